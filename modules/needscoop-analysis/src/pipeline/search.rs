use std::collections::HashSet;

use needscoop_common::{
    EmbeddingProvider, NeedScoopError, Post, PostStore, VectorFilter, VectorStore,
};

use crate::embedding::normalize;

/// Post-metadata constraints applied before the vector query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Primary signal category of the post's latest annotation.
    pub category: Option<String>,
    pub min_likes: Option<u64>,
}

impl SearchFilter {
    fn is_empty(&self) -> bool {
        self.category.is_none() && self.min_likes.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub post: Post,
    pub distance: f32,
    pub primary: Option<String>,
}

/// Semantic search over stored vectors for the provider's current model.
pub async fn search(
    provider: &dyn EmbeddingProvider,
    vectors: &dyn VectorStore,
    posts: &dyn PostStore,
    query: &str,
    limit: usize,
    filter: &SearchFilter,
) -> Result<Vec<SearchHit>, NeedScoopError> {
    let query = normalize(query);
    if query.is_empty() {
        return Err(NeedScoopError::Validation("search query is empty".into()));
    }

    let mut vector_filter = VectorFilter::model(provider.model_version());
    if !filter.is_empty() {
        let mut allowed = HashSet::new();
        for post in posts.posts().await? {
            if filter.min_likes.is_some_and(|min| post.likes < min) {
                continue;
            }
            if let Some(category) = &filter.category {
                let primary = posts
                    .latest_annotation(&post.id)
                    .await?
                    .and_then(|a| a.primary);
                if primary.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            allowed.insert(post.id);
        }
        vector_filter.post_ids = Some(allowed);
    }

    let embedded = provider.embed_batch(std::slice::from_ref(&query)).await?;
    let Some(query_vector) = embedded.into_iter().next() else {
        return Err(NeedScoopError::Validation("provider returned no vector".into()));
    };

    let mut hits = Vec::new();
    for neighbor in vectors.query(&query_vector, limit, &vector_filter).await? {
        let Some(post) = posts.get_post(&neighbor.post_id).await? else {
            continue;
        };
        let primary = posts
            .latest_annotation(&post.id)
            .await?
            .and_then(|a| a.primary);
        hits.push(SearchHit {
            post,
            distance: neighbor.distance,
            primary,
        });
    }
    Ok(hits)
}
