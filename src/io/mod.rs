//! Reading match histories and writing posterior draws. Enable via the `csv` feature.

pub mod csv;
