use crate::domain::error::Result;
use crate::domain::ports::{ProcessLocator, ProcessTable};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

// Shells wrapping the real service are a recurring recipe mistake: the
// agent ends up monitoring the shell, which outlives or predeceases the
// actual server.
const CONSOLE_NAMES: &[&str] = &["sh", "bash", "dash", "zsh", "ksh"];

const MAX_DESCENT: usize = 64;

/// Resolves the monitored pid by descending the process tree from the
/// directly launched child to its long-lived leaf.
pub struct LeafProcessLocator {
    table: Arc<dyn ProcessTable>,
}

impl LeafProcessLocator {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        LeafProcessLocator { table }
    }
}

#[async_trait]
impl ProcessLocator for LeafProcessLocator {
    async fn locate(&self, direct_child: Option<u32>) -> Result<Vec<u32>> {
        let Some(start) = direct_child else {
            return Ok(Vec::new());
        };
        let mut current = start;
        for _ in 0..MAX_DESCENT {
            let children = self.table.children(current).await?;
            match children.as_slice() {
                [] => break,
                [only] => current = *only,
                [first, ..] => {
                    warn!(
                        pid = current,
                        children = children.len(),
                        "process has multiple children, monitoring the first"
                    );
                    current = *first;
                }
            }
        }
        if let Some(name) = self.table.command_name(current).await? {
            if CONSOLE_NAMES.contains(&name.as_str()) {
                warn!(
                    pid = current,
                    name,
                    "monitored process looks like a shell, check the start command"
                );
            }
        }
        Ok(vec![current])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::AgentError;
    use std::collections::HashMap;

    struct TreeTable {
        children: HashMap<u32, Vec<u32>>,
        names: HashMap<u32, String>,
    }

    #[async_trait]
    impl ProcessTable for TreeTable {
        async fn is_alive(&self, _pid: u32) -> Result<bool> {
            Ok(true)
        }

        async fn command_name(&self, pid: u32) -> Result<Option<String>> {
            Ok(self.names.get(&pid).cloned())
        }

        async fn children(&self, parent: u32) -> Result<Vec<u32>> {
            Ok(self.children.get(&parent).cloned().unwrap_or_default())
        }

        async fn parent_chain(&self, child: u32, _stop_at: u32) -> Result<Vec<u32>> {
            Ok(vec![child])
        }

        async fn find_by_name(&self, _name: &str) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        async fn terminate(&self, _pid: u32) -> Result<()> {
            Err(AgentError::ProcessQuery("not implemented".into()))
        }
    }

    #[tokio::test]
    async fn test_descends_to_leaf() {
        let locator = LeafProcessLocator::new(Arc::new(TreeTable {
            children: [(10, vec![20]), (20, vec![30])].into_iter().collect(),
            names: [(30, "java".to_string())].into_iter().collect(),
        }));
        assert_eq!(locator.locate(Some(10)).await.unwrap(), vec![30]);
    }

    #[tokio::test]
    async fn test_childless_process_is_its_own_leaf() {
        let locator = LeafProcessLocator::new(Arc::new(TreeTable {
            children: HashMap::new(),
            names: HashMap::new(),
        }));
        assert_eq!(locator.locate(Some(10)).await.unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn test_no_direct_child_yields_nothing() {
        let locator = LeafProcessLocator::new(Arc::new(TreeTable {
            children: HashMap::new(),
            names: HashMap::new(),
        }));
        assert!(locator.locate(None).await.unwrap().is_empty());
    }
}
