//! Canonical result payload returned by both the Single-Stage Runner and the
//! Two-Stage Pipeline's merge stage (spec §4.7 step 8, §4.8.4 step 6,
//! §6 "Result schema").

use crate::model::{Chunk, MinioAssetRecord};
use serde::{Deserialize, Serialize};

/// `{result, txt?, minio_assets?}` — the shape every successful task result
/// serializes to, regardless of which pipeline variant produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub result: Vec<Chunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minio_assets: Option<MinioAssetRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_without_txt_or_assets_omits_both_fields() {
        let result = ConversionResult { result: vec![], txt: None, minio_assets: None };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("txt"));
        assert!(!json.contains("minio_assets"));
    }
}
