//! Pipeline model.
//!
//! A pipeline is an ordered list of ports. Memberships are kept sorted by
//! `position`; the order is part of the pipeline's shared state.

use serde::{Deserialize, Serialize};

/// One port's place in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePort {
    pub port_id: String,
    pub position: i32,
}

/// An ordered group of ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub ports: Vec<PipelinePort>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Pipeline {
    /// Create a pipeline over `port_ids`, numbering positions from zero.
    #[must_use]
    pub fn new(id: &str, name: &str, port_ids: &[&str]) -> Self {
        let now = super::now_millis();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: "pending".to_string(),
            ports: port_ids
                .iter()
                .zip(0..)
                .map(|(port_id, position)| PipelinePort {
                    port_id: (*port_id).to_string(),
                    position,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sort memberships by position.
    pub fn normalize_order(&mut self) {
        self.ports.sort_by_key(|p| p.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_numbers_positions() {
        let pipeline = Pipeline::new("pipe_1", "Release", &["port_a", "port_b", "port_c"]);
        let positions: Vec<i32> = pipeline.ports.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(pipeline.ports[2].port_id, "port_c");
    }

    #[test]
    fn test_normalize_order() {
        let mut pipeline = Pipeline::new("pipe_1", "Release", &[]);
        pipeline.ports = vec![
            PipelinePort { port_id: "b".into(), position: 2 },
            PipelinePort { port_id: "a".into(), position: 1 },
        ];
        pipeline.normalize_order();
        assert_eq!(pipeline.ports[0].port_id, "a");
    }
}
