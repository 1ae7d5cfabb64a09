// see [Definitions of the SI units: The binary prefixes](https://physics.nist.gov/cuu/Units/binary.html)
// see [Resource Management for Pods and Containers - Kubernetes](https://kubernetes.io/docs/concepts/configuration/manage-resources-containers/)

use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Empty quantity")]
    Empty,

    #[error("Failed to read the number of {input:?}")]
    InvalidNumber { input: String },

    #[error("Unknown {dimension} unit {unit:?} in {input:?}")]
    UnknownUnit {
        dimension: Dimension,
        unit: String,
        input: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cpu,
    Memory,
}

impl Dimension {
    pub const ALL: [Dimension; 2] = [Dimension::Cpu, Dimension::Memory];

    /// Key of the dimension in kubernetes resource lists.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }

    /// Number of atoms (nanocores, bytes) in one base unit (nanocore, kibibyte).
    fn atoms_per_base(&self) -> f64 {
        match self {
            Self::Cpu => 1.0,
            Self::Memory => 1024.0,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Cores,
    Milli,
    Nano,
    Bytes,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
    Pebi,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
}

#[derive(Debug)]
struct UnitDef {
    unit: Unit,
    dimension: Dimension,
    label: &'static str,
    display_label: &'static str,
    atoms: f64,
}

const KI: f64 = 1024.0;

static ALL: [UnitDef; 14] = [
    UnitDef { unit: Unit::Cores, dimension: Dimension::Cpu, label: "", display_label: "", atoms: 1e9 },
    UnitDef { unit: Unit::Milli, dimension: Dimension::Cpu, label: "m", display_label: "m", atoms: 1e6 },
    UnitDef { unit: Unit::Nano, dimension: Dimension::Cpu, label: "n", display_label: "n", atoms: 1.0 },
    UnitDef { unit: Unit::Bytes, dimension: Dimension::Memory, label: "", display_label: "B", atoms: 1.0 },
    UnitDef { unit: Unit::Kibi, dimension: Dimension::Memory, label: "Ki", display_label: "KiB", atoms: KI },
    UnitDef { unit: Unit::Mebi, dimension: Dimension::Memory, label: "Mi", display_label: "MiB", atoms: KI * KI },
    UnitDef { unit: Unit::Gibi, dimension: Dimension::Memory, label: "Gi", display_label: "GiB", atoms: KI * KI * KI },
    UnitDef { unit: Unit::Tebi, dimension: Dimension::Memory, label: "Ti", display_label: "TiB", atoms: KI * KI * KI * KI },
    UnitDef { unit: Unit::Pebi, dimension: Dimension::Memory, label: "Pi", display_label: "PiB", atoms: KI * KI * KI * KI * KI },
    UnitDef { unit: Unit::Kilo, dimension: Dimension::Memory, label: "K", display_label: "KB", atoms: 1e3 },
    UnitDef { unit: Unit::Mega, dimension: Dimension::Memory, label: "M", display_label: "MB", atoms: 1e6 },
    UnitDef { unit: Unit::Giga, dimension: Dimension::Memory, label: "G", display_label: "GB", atoms: 1e9 },
    UnitDef { unit: Unit::Tera, dimension: Dimension::Memory, label: "T", display_label: "TB", atoms: 1e12 },
    UnitDef { unit: Unit::Peta, dimension: Dimension::Memory, label: "P", display_label: "PB", atoms: 1e15 },
];

impl Unit {
    fn def(&self) -> &'static UnitDef {
        // every variant has exactly one row in ALL
        ALL.iter()
            .find(|d| d.unit == *self)
            .unwrap_or(&ALL[0])
    }

    /// Finds the unit of `dimension` matching `token`, ignoring ascii case.
    /// Memory tokens may carry a trailing `B` (`KiB`, `GB`, `B`) as rendered by the formatter.
    ///
    /// Memory has no milli unit: `m` is mega, so the millibyte form the apiserver
    /// may write (`1288490188800m`) reads a billion times too large.
    pub fn lookup(dimension: Dimension, token: &str) -> Option<Unit> {
        let token = token.trim();
        let token = match dimension {
            Dimension::Memory => token
                .strip_suffix(['B', 'b'])
                .unwrap_or(token),
            Dimension::Cpu => token,
        };
        ALL.iter()
            .filter(|d| d.dimension == dimension)
            .find(|d| d.label.eq_ignore_ascii_case(token))
            .map(|d| d.unit)
    }

    pub fn dimension(&self) -> Dimension {
        self.def().dimension
    }

    /// Suffix as emitted by kubernetes (`Ki`, `m`, ...).
    pub fn label(&self) -> &'static str {
        self.def().label
    }

    /// Suffix for humans (`KiB`, `m`, ...).
    pub fn display_label(&self) -> &'static str {
        self.def().display_label
    }

    /// Atoms (nanocores or bytes) in one of this unit.
    pub fn atoms(&self) -> f64 {
        self.def().atoms
    }

    /// Base units (nanocores or kibibytes) in one of this unit.
    pub fn multiplier(&self) -> f64 {
        self.atoms() / self.dimension().atoms_per_base()
    }
}

/// A non negative amount of cpu (in nanocores) or memory (in kibibytes).
///
/// Values are always a whole number of atoms (nanocores, bytes), so sums are exact
/// and independent of the order of the terms.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Quantity {
    dimension: Dimension,
    value: f64,
}

impl Quantity {
    pub fn zero(dimension: Dimension) -> Self {
        Quantity {
            dimension,
            value: 0.0,
        }
    }

    /// Builds a quantity from a value expressed in the base unit of `dimension`.
    pub fn from_base(dimension: Dimension, value: f64) -> Self {
        Self::from_atoms(dimension, value * dimension.atoms_per_base())
    }

    fn from_atoms(dimension: Dimension, atoms: f64) -> Self {
        let atoms = if atoms.is_finite() {
            atoms.round().max(0.0)
        } else {
            0.0
        };
        Quantity {
            dimension,
            value: atoms / dimension.atoms_per_base(),
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Value in the base unit: nanocores for cpu, kibibytes for memory.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value in nanocores for cpu, in bytes for memory.
    pub fn atoms(&self) -> f64 {
        self.value * self.dimension.atoms_per_base()
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    /// Parses a kubernetes quantity like `250m`, `32859908n`, `1.5`, `1847100Ki` or `2G`.
    ///
    /// Never fails: malformed input counts as zero so that one bad sample can not
    /// break a whole aggregation. Use [`Quantity::parse_strict`] to get the reason.
    pub fn parse(raw: &str, dimension: Dimension) -> Self {
        Self::parse_strict(raw, dimension).unwrap_or_else(|err| {
            debug!(input = raw, %dimension, %err, "unparsable quantity counted as zero");
            Self::zero(dimension)
        })
    }

    pub fn parse_strict(raw: &str, dimension: Dimension) -> Result<Self, Error> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(Error::Empty);
        }
        let pos = input
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(input.len());
        let (num_str, unit_str) = input.split_at(pos);
        let number = num_str
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| Error::InvalidNumber {
                input: input.to_string(),
            })?;
        let unit = Unit::lookup(dimension, unit_str).ok_or_else(|| Error::UnknownUnit {
            dimension,
            unit: unit_str.trim().to_string(),
            input: input.to_string(),
        })?;
        Ok(Self::from_atoms(dimension, number * unit.atoms()))
    }

    pub fn sum<'a, I>(dimension: Dimension, quantities: I) -> Self
    where
        I: IntoIterator<Item = &'a Quantity>,
    {
        quantities
            .into_iter()
            .fold(Self::zero(dimension), |acc, q| &acc + q)
    }

    pub fn calc_percentage(&self, base100: &Self) -> f64 {
        percentage(self, base100)
    }
}

/// `used / total * 100`, or `0` when `total` is zero. Not clamped: over-commitment
/// legitimately reports more than 100.
pub fn percentage(used: &Quantity, total: &Quantity) -> f64 {
    if total.value > 0.0 {
        used.value / total.value * 100.0
    } else {
        0.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::human_format::format_quantity(self))
    }
}

impl std::ops::Add for &Quantity {
    type Output = Quantity;
    fn add(self, other: Self) -> Quantity {
        debug_assert_eq!(self.dimension, other.dimension);
        Quantity {
            dimension: self.dimension,
            value: self.value + other.value,
        }
    }
}

impl<'b> std::ops::AddAssign<&'b Quantity> for Quantity {
    fn add_assign(&mut self, other: &'b Self) {
        *self = &*self + other;
    }
}
