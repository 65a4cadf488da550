//! Target - コマンドの対象タスクの指定と解決

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::TaskdError;
use super::task::Task;

/// Identifies one or more tasks by id, name or group.
///
/// Resolution:
/// - `id` wins when present.
/// - otherwise `name`, then `group`.
/// - `mat = false`: exact match, exactly one task required.
/// - `mat = true`: the value is a regular expression, every match is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub group: Option<String>,
    pub mat: bool,
    /// Only meaningful for Remove: delete even if the task is running.
    pub force: bool,
}

#[derive(Clone, Copy)]
enum Selector<'a> {
    Name(&'a str),
    Group(&'a str),
}

impl Target {
    pub fn id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn group(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            ..Default::default()
        }
    }

    pub fn matching(mut self) -> Self {
        self.mat = true;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Resolve against a snapshot of the store (ascending id). Returns the ids.
    pub fn resolve(&self, tasks: &[Task]) -> Result<Vec<i64>, TaskdError> {
        let ids = self.select(tasks)?;
        match ids.len() {
            0 => Err(TaskdError::NotFound(self.to_string())),
            1 => Ok(ids),
            count if !self.mat => Err(TaskdError::Ambiguous {
                target: self.to_string(),
                count,
            }),
            _ => Ok(ids),
        }
    }

    /// Every task the target names, without the single-match rule. List uses this.
    pub fn select(&self, tasks: &[Task]) -> Result<Vec<i64>, TaskdError> {
        if let Some(id) = self.id.filter(|id| *id > 0) {
            return Ok(tasks.iter().filter(|t| t.id == id).map(|t| t.id).collect());
        }

        let selector = match (self.name.as_deref(), self.group.as_deref()) {
            (Some(name), _) if !name.is_empty() => Selector::Name(name),
            (_, Some(group)) if !group.is_empty() => Selector::Group(group),
            _ => {
                return Err(TaskdError::InvalidRequest(
                    "Task id or name or group is required".to_string(),
                ));
            }
        };

        if !self.mat {
            return Ok(tasks
                .iter()
                .filter(|t| match selector {
                    Selector::Name(name) => t.name == name,
                    Selector::Group(group) => t.group.as_deref() == Some(group),
                })
                .map(|t| t.id)
                .collect());
        }

        let pattern = match selector {
            Selector::Name(p) | Selector::Group(p) => p,
        };
        let regex = Regex::new(pattern)
            .map_err(|e| TaskdError::InvalidRequest(format!("bad pattern [{pattern}]: {e}")))?;
        Ok(tasks
            .iter()
            .filter(|t| match selector {
                Selector::Name(_) => regex.is_match(&t.name),
                Selector::Group(_) => t.group.as_deref().is_some_and(|g| regex.is_match(g)),
            })
            .map(|t| t.id)
            .collect())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id.filter(|id| *id > 0) {
            return write!(f, "{id}");
        }
        if let Some(name) = &self.name {
            return write!(f, "name={name}");
        }
        if let Some(group) = &self.group {
            return write!(f, "group={group}");
        }
        f.write_str("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> Vec<Task> {
        let mut a = Task::new(1, "backup-db", "true");
        a.group = Some("nightly".into());
        let mut b = Task::new(2, "backup-files", "true");
        b.group = Some("nightly".into());
        let c = Task::new(3, "web", "true");
        let d = Task::new(4, "web", "true");
        vec![a, b, c, d]
    }

    #[test]
    fn id_resolves_exactly() {
        assert_eq!(Target::id(2).resolve(&tasks()).unwrap(), vec![2]);
        assert!(matches!(
            Target::id(9).resolve(&tasks()),
            Err(TaskdError::NotFound(_))
        ));
    }

    #[test]
    fn exact_name_requires_a_single_match() {
        assert_eq!(Target::name("backup-db").resolve(&tasks()).unwrap(), vec![1]);
        assert!(matches!(
            Target::name("web").resolve(&tasks()),
            Err(TaskdError::Ambiguous { count: 2, .. })
        ));
        assert!(matches!(
            Target::name("nope").resolve(&tasks()),
            Err(TaskdError::NotFound(_))
        ));
    }

    #[test]
    fn mat_selects_every_regex_match() {
        assert_eq!(
            Target::name("^backup-").matching().resolve(&tasks()).unwrap(),
            vec![1, 2]
        );
        assert_eq!(Target::name("web").matching().resolve(&tasks()).unwrap(), vec![3, 4]);
        assert_eq!(
            Target::group("night").matching().resolve(&tasks()).unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            Target::name("(").matching().resolve(&tasks()),
            Err(TaskdError::InvalidRequest(_))
        ));
    }

    #[test]
    fn group_without_mat_is_ambiguous_when_shared() {
        assert!(matches!(
            Target::group("nightly").resolve(&tasks()),
            Err(TaskdError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn select_skips_the_single_match_rule() {
        assert_eq!(Target::name("web").select(&tasks()).unwrap(), vec![3, 4]);
        assert!(Target::name("nope").select(&tasks()).unwrap().is_empty());
        assert!(Target::id(9).select(&tasks()).unwrap().is_empty());
    }

    #[test]
    fn empty_target_is_rejected() {
        assert!(matches!(
            Target::default().resolve(&tasks()),
            Err(TaskdError::InvalidRequest(_))
        ));
    }
}
