use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::{Engine, OperatingHours};
use crate::limits::*;

/// Manages per-conference engines. Each conference gets its own Engine, WAL
/// file and background compactor; the database name from the client
/// connection selects the conference.
pub struct ConferenceManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    hours: OperatingHours,
}

impl ConferenceManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, hours: OperatingHours) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            hours,
        }
    }

    /// Get or lazily create an engine for the given conference.
    pub fn get_or_create(&self, conference: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(conference) {
            return Ok(engine.value().clone());
        }
        if conference.len() > MAX_CONFERENCE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "conference name too long",
            ));
        }
        if self.engines.len() >= MAX_CONFERENCES {
            return Err(std::io::Error::other("too many conferences"));
        }

        // Sanitize the name to prevent path traversal
        let safe_name: String = conference
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty conference name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.hours)?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(conference.to_string(), engine.clone());
        metrics::gauge!(crate::observability::CONFERENCES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hours::{DAY_MS, MINUTE_MS};
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("callboard_test_conference").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> ConferenceManager {
        ConferenceManager::new(dir, 1000, OperatingHours::DEFAULT)
    }

    #[tokio::test]
    async fn conference_isolation() {
        let tm = manager(test_data_dir("isolation"));

        let eng_a = tm.get_or_create("rustconf").unwrap();
        let eng_b = tm.get_or_create("jsconf").unwrap();

        let rid = Ulid::new();

        // Create the same room ID in both conferences
        eng_a.create_room(rid, "Main".into(), 100, None).await.unwrap();
        eng_b.create_room(rid, "Main".into(), 100, None).await.unwrap();

        // Book a slot in conference A only
        let talk_id = Ulid::new();
        eng_a
            .submit_talk(talk_id, "T".into(), "S".into(), "Rust".into(), 60, TalkLevel::Beginner, None)
            .await
            .unwrap();
        eng_a.set_talk_status(talk_id, TalkStatus::Accepted).await.unwrap();
        let day = 20_000;
        let ten = day * DAY_MS + 10 * 60 * MINUTE_MS;
        eng_a
            .schedule_talk(Ulid::new(), talk_id, rid, ten, ten + 60 * MINUTE_MS)
            .await
            .unwrap();

        // Conference B's room is still completely free
        let free_b = eng_b.free_slots(rid, day).await.unwrap();
        assert_eq!(free_b.len(), 1);
        let free_a = eng_a.free_slots(rid, day).await.unwrap();
        assert_eq!(free_a.len(), 2);
    }

    #[tokio::test]
    async fn conference_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create a conference
        let _eng = tm.get_or_create("devfest").unwrap();

        // WAL file should now exist
        assert!(dir.join("devfest.wal").exists());
    }

    #[tokio::test]
    async fn conference_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn conference_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn conference_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));

        let long_name = "x".repeat(MAX_CONFERENCE_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("conference name too long"));
    }

    #[tokio::test]
    async fn conference_count_limit() {
        let tm = manager(test_data_dir("count_limit"));

        for i in 0..MAX_CONFERENCES {
            tm.get_or_create(&format!("c{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many conferences"));
    }
}
