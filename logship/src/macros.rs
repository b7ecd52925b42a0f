//! Shorthands for building and returning [`crate::error::ExportError`]s.

/// Builds an [`crate::error::ExportError`] from a kind, a static description and an optional
/// detail.
#[macro_export]
macro_rules! export_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ExportError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ExportError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with an [`crate::error::ExportError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::export_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::export_error!($kind, $desc, $detail))
    };
}
