use serde::{Deserialize, Serialize};

// =============================================================================
// Embeddings
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: usize,
}

impl EmbeddingResponse {
    /// Vectors in request order. Providers may return `data` out of order.
    pub fn into_ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_dimensions() {
        let input = vec!["a".to_string()];
        let req = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
            dimensions: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["input"][0], "a");
    }

    #[test]
    fn response_is_reordered_by_index() {
        let body = r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.into_ordered(), vec![vec![1.0], vec![2.0]]);
    }
}
