use crate::error::{AskJsonError, Result};
use std::collections::{BTreeMap, HashSet};

/// directed acyclic graph for task orchestration
#[derive(Debug, Clone, Default)]
pub struct Dag {
    /// task_id -> task_ids it depends on
    dependencies: BTreeMap<String, Vec<String>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, id: String, dependencies: Vec<String>) {
        self.dependencies.insert(id, dependencies);
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// check for cycles and missing dependencies
    pub fn validate(&self) -> Result<()> {
        for (task_id, deps) in &self.dependencies {
            for dep in deps {
                if !self.dependencies.contains_key(dep) {
                    return Err(AskJsonError::Analysis(format!(
                        "task '{}' depends on non-existent task '{}'",
                        task_id, dep
                    )));
                }
            }
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for task_id in self.dependencies.keys() {
            if !visited.contains(task_id.as_str())
                && self.has_cycle(task_id, &mut visited, &mut rec_stack)
            {
                return Err(AskJsonError::Analysis("dag contains a cycle".to_string()));
            }
        }

        Ok(())
    }

    fn has_cycle<'a>(
        &'a self,
        task_id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> bool {
        visited.insert(task_id);
        rec_stack.insert(task_id);

        if let Some(deps) = self.dependencies.get(task_id) {
            for dep in deps {
                if rec_stack.contains(dep.as_str()) {
                    return true;
                }
                if !visited.contains(dep.as_str()) && self.has_cycle(dep, visited, rec_stack) {
                    return true;
                }
            }
        }

        rec_stack.remove(task_id);
        false
    }

    /// tasks grouped by execution level (kahn's algorithm)
    ///
    /// Level 0 holds tasks without dependencies, level n the tasks whose
    /// dependencies all sit in earlier levels. Ids within a level are sorted.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, &pending)| pending == 0)
                .map(|(id, _)| id.to_string())
                .collect();

            if ready.is_empty() {
                return Err(AskJsonError::Analysis(
                    "dag contains unreachable tasks or cycles".to_string(),
                ));
            }

            for id in &ready {
                remaining.remove(id.as_str());
            }

            for (id, pending) in remaining.iter_mut() {
                let deps = &self.dependencies[*id];
                *pending -= deps.iter().filter(|d| ready.contains(d)).count();
            }

            levels.push(ready);
        }

        Ok(levels)
    }
}
