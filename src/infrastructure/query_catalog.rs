// Static query catalog loaded from configuration
use crate::application::query_source::{QueryCatalog, QueryCommand};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct StaticQueryCatalog {
    commands: HashMap<String, QueryCommand>,
}

impl StaticQueryCatalog {
    /// Later commands replace earlier ones with the same name.
    pub fn new(commands: Vec<QueryCommand>) -> Self {
        let commands = commands
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

impl QueryCatalog for StaticQueryCatalog {
    fn find(&self, name: &str) -> Option<QueryCommand> {
        self.commands.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, sql: &str) -> QueryCommand {
        QueryCommand {
            name: name.to_string(),
            sql: sql.to_string(),
            enabled: true,
            data_source: Default::default(),
        }
    }

    #[test]
    fn test_find_by_name() {
        let catalog = StaticQueryCatalog::new(vec![
            command("a", "SELECT 1"),
            command("b", "SELECT 2"),
            command("a", "SELECT 3"),
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.find("a").unwrap().sql, "SELECT 3");
        assert!(catalog.find("c").is_none());
    }
}
