use labelcheck_common::error::{LabelError, LabelResult};
use serde::Deserialize;

use crate::env::{get_var_or, parse_var_or};

/// Settings for the `pdftoppm` rasterizer.
#[derive(Debug, Clone, Deserialize)]
pub struct PdftoppmConfig {
    pub program: String,
    pub dpi: u32,
    pub timeout_secs: u64,
}

impl PdftoppmConfig {
    pub fn from_env() -> LabelResult<Self> {
        let config = Self {
            program: get_var_or("PDFTOPPM_PATH", "pdftoppm"),
            dpi: parse_var_or("PDF_RASTER_DPI", 150)?,
            timeout_secs: parse_var_or("PDF_RASTER_TIMEOUT_SECS", 30)?,
        };
        if config.dpi == 0 || config.timeout_secs == 0 {
            return Err(LabelError::Config(
                "PDF_RASTER_DPI and PDF_RASTER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}
