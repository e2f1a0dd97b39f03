use std::{
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
};

use depot_registry::{parse_constraint, Constraint};
use miette::Result;
use nu_ansi_term::Color;

static COLOR: AtomicBool = AtomicBool::new(true);
static PROGRESS: AtomicBool = AtomicBool::new(true);

pub fn disable_color() {
    COLOR.store(false, Ordering::Relaxed);
}

pub fn disable_progress() {
    PROGRESS.store(false, Ordering::Relaxed);
}

pub fn progress_enabled() -> bool {
    PROGRESS.load(Ordering::Relaxed)
}

pub struct Colored<T: Display>(pub Color, pub T);

impl<T: Display> Display for Colored<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if COLOR.load(Ordering::Relaxed) {
            write!(f, "{}", self.0.prefix())?;
            self.1.fmt(f)?;
            write!(f, "{}", self.0.suffix())
        } else {
            self.1.fmt(f)
        }
    }
}

/// Splits `vendor/name:version` into a lowercase name and an optional
/// constraint.
pub fn parse_package_arg(arg: &str) -> Result<(String, Option<Box<dyn Constraint>>)> {
    match arg.split_once(':') {
        Some((name, version)) => Ok((name.to_lowercase(), Some(parse_constraint(version)?))),
        None => Ok((arg.to_lowercase(), None)),
    }
}
