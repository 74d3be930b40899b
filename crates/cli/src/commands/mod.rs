#[cfg(all(feature = "sqlite", feature = "postgres"))]
pub(crate) mod migrate;
pub(crate) mod serve;
