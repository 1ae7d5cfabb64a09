//! `human_format` renders [`Quantity`] values into short strings for humans.
//!
//! ```rust
//! use kube_overview::qty::{Dimension, Quantity};
//! use kube_overview::human_format::format_quantity;
//!
//! // "32.86m"
//! let cpu = Quantity::parse("32859908n", Dimension::Cpu);
//! # assert_eq!(format_quantity(&cpu), "32.86m");
//!
//! // "1.76 GiB"
//! let memory = Quantity::parse("1847100Ki", Dimension::Memory);
//! # assert_eq!(format_quantity(&memory), "1.76 GiB");
//! ```
//!
//! Memory is always displayed with binary units, even when it was parsed from a
//! decimal suffix (`1G` is rendered as `953.67 MiB`).

use crate::qty::{Dimension, Quantity, Unit};

#[derive(Debug)]
struct ScaledValue {
    value: f64,
    unit: Unit,
}

/// Ladder of display units, each one `base` times the previous.
#[derive(Debug)]
pub struct Scales {
    base: f64,
    units: &'static [Unit],
}

impl Scales {
    /// `m` then cores.
    pub fn cpu() -> Self {
        Scales {
            base: 1000.0,
            units: &[Unit::Milli, Unit::Cores],
        }
    }

    /// `B`, `KiB`, `MiB`, `GiB` then `TiB`.
    pub fn binary() -> Self {
        Scales {
            base: 1024.0,
            units: &[Unit::Bytes, Unit::Kibi, Unit::Mebi, Unit::Gibi, Unit::Tebi],
        }
    }

    fn to_scaled_value(&self, atoms: f64) -> ScaledValue {
        let mut index: usize = 0;
        let mut value = atoms / self.units[0].atoms();

        while value >= self.base && index + 1 < self.units.len() {
            value /= self.base;
            index += 1;
        }

        ScaledValue {
            value,
            unit: self.units[index],
        }
    }
}

/// Formatting rules of one [`Dimension`].
#[derive(Debug)]
pub struct Formatter {
    decimals: usize,
    separator: &'static str,
    scales: Scales,
}

impl Formatter {
    pub fn for_dimension(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Cpu => Formatter {
                decimals: 2,
                separator: "",
                scales: Scales::cpu(),
            },
            Dimension::Memory => Formatter {
                decimals: 2,
                separator: " ",
                scales: Scales::binary(),
            },
        }
    }

    pub fn format(&self, quantity: &Quantity) -> String {
        let scaled = self.scales.to_scaled_value(quantity.atoms());
        // whole bytes have no fraction to show
        let decimals = if scaled.unit == Unit::Bytes {
            0
        } else {
            self.decimals
        };
        let label = scaled.unit.display_label();
        let separator = if label.is_empty() { "" } else { self.separator };
        format!(
            "{:.width$}{}{}",
            scaled.value,
            separator,
            label,
            width = decimals
        )
    }
}

pub fn format_quantity(quantity: &Quantity) -> String {
    Formatter::for_dimension(quantity.dimension()).format(quantity)
}

/// Clamps to `[0, 100]`, for display only.
pub fn format_percentage(percentage: f64) -> String {
    let clamped = if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    };
    format!("{:.2}%", clamped)
}
