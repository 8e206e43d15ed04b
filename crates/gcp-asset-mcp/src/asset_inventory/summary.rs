use serde::{Deserialize, Serialize};

use super::client::Asset;

/// The projection of an asset returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub name: String,
    pub asset_type: String,
    /// Empty when the asset carries no resource or the resource has no location.
    pub location: String,
}

impl From<&Asset> for AssetSummary {
    fn from(asset: &Asset) -> Self {
        Self {
            name: asset.name.clone(),
            asset_type: asset.asset_type.clone(),
            location: asset
                .resource
                .as_ref()
                .and_then(|resource| resource.location.clone())
                .unwrap_or_default(),
        }
    }
}

/// Renders summaries as a compact JSON array, `[]` when there are none.
pub fn summaries_to_json(summaries: &[AssetSummary]) -> Result<String, serde_json::Error> {
    serde_json::to_string(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_inventory::client::AssetResource;
    use serde_json::{json, Value};

    fn asset(resource: Option<AssetResource>) -> Asset {
        Asset {
            name: "//storage.googleapis.com/b1".to_string(),
            asset_type: "storage.googleapis.com/Bucket".to_string(),
            resource,
        }
    }

    #[test]
    fn test_location_from_resource() {
        let summary = AssetSummary::from(&asset(Some(AssetResource {
            location: Some("us-central1".to_string()),
        })));
        assert_eq!(summary.location, "us-central1");
        assert_eq!(summary.name, "//storage.googleapis.com/b1");
        assert_eq!(summary.asset_type, "storage.googleapis.com/Bucket");
    }

    #[test]
    fn test_missing_location_is_empty() {
        assert_eq!(AssetSummary::from(&asset(None)).location, "");
        assert_eq!(
            AssetSummary::from(&asset(Some(AssetResource::default()))).location,
            ""
        );
    }

    #[test]
    fn test_json_shape() {
        assert_eq!(summaries_to_json(&[]).unwrap(), "[]");

        let json = summaries_to_json(&[AssetSummary::from(&asset(None))]).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            json!([{
                "name": "//storage.googleapis.com/b1",
                "asset_type": "storage.googleapis.com/Bucket",
                "location": ""
            }])
        );
    }
}
