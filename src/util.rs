use core::fmt;

macro_rules! test_trace {
    ($($tt:tt)*) => {
        #[cfg(test)]
        tracing::trace!($($tt)*)
    }
}

/// Formats an `Option` without the `Some(..)` wrapper, printing a placeholder
/// string for `None`. Keeps `Debug` output for nullable links readable.
pub(crate) struct FmtOption<'a, T> {
    opt: Option<&'a T>,
}

impl<'a, T> FmtOption<'a, T> {
    pub(crate) fn new(opt: &'a Option<T>) -> Self {
        Self { opt: opt.as_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for FmtOption<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opt {
            Some(val) => val.fmt(f),
            None => f.write_str("None"),
        }
    }
}
