// Series key resolver - Stable identity for a series across restarts
use crate::application::persistence::{title_key, PersistenceGateway};
use crate::domain::error::StoreError;
use crate::domain::series::SourceAttrs;
use std::sync::Arc;

/// Derives the storage key for a series.
///
/// Two series sharing a title resolve to the same key when neither has an
/// explicit id. That ambiguity is accepted rather than papered over.
#[derive(Clone)]
pub struct SeriesKeyResolver {
    gateway: Arc<dyn PersistenceGateway>,
}

impl SeriesKeyResolver {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    pub async fn resolve(
        &self,
        explicit_id: Option<&str>,
        title: &str,
        source: &SourceAttrs,
    ) -> Result<String, StoreError> {
        if let Some(id) = explicit_id {
            return Ok(id.to_string());
        }

        let mapping_key = title_key(title);
        if let Some(raw) = self.gateway.get(&mapping_key).await? {
            match serde_json::from_str::<String>(&raw) {
                Ok(key) if !key.is_empty() => return Ok(key),
                _ => tracing::warn!("Ignoring malformed series key mapping for '{}'", title),
            }
        }

        let key = synthesize_key(title, source);
        self.gateway
            .put(&mapping_key, &serde_json::to_string(&key)?)
            .await?;
        tracing::info!("Assigned series key {} to '{}'", key, title);
        Ok(key)
    }
}

fn synthesize_key(title: &str, source: &SourceAttrs) -> String {
    [
        normalize(title),
        normalize(&source.db_name),
        normalize(&source.table_name),
        normalize(&source.field_name),
    ]
    .join("_")
}

/// Lowercase, whitespace to underscore, collapse repeated underscores.
fn normalize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        let c = if c.is_whitespace() { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;

    fn source() -> SourceAttrs {
        SourceAttrs {
            db_name: "Plant DB".to_string(),
            table_name: "boiler__readings".to_string(),
            field_name: "Temp".to_string(),
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Boiler  Room Temp"), "boiler_room_temp");
        assert_eq!(normalize("a__b\t_c"), "a_b_c");
        assert_eq!(normalize(""), "");
    }

    #[tokio::test]
    async fn test_explicit_id_wins() {
        let resolver = SeriesKeyResolver::new(Arc::new(MemoryStore::new()));
        let key = resolver.resolve(Some("sensor-7"), "Title", &source()).await.unwrap();
        assert_eq!(key, "sensor-7");

        // Returned as given, without normalization.
        let key = resolver.resolve(Some(" Sensor 7 "), "Title", &source()).await.unwrap();
        assert_eq!(key, " Sensor 7 ");
    }

    #[tokio::test]
    async fn test_synthesized_key_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let resolver = SeriesKeyResolver::new(store.clone());

        let key = resolver.resolve(None, "Boiler Temp", &source()).await.unwrap();
        assert_eq!(key, "boiler_temp_plant_db_boiler_readings_temp");

        // A later lookup with different source attributes still returns the
        // stored mapping for the same title.
        let other = SourceAttrs::default();
        let again = SeriesKeyResolver::new(store)
            .resolve(None, "Boiler Temp", &other)
            .await
            .unwrap();
        assert_eq!(again, key);
    }
}
