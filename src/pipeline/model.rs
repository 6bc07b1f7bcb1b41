// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Pipeline graph model, as stored by the gateway.
//!
//! A pipeline is a DAG of typed nodes. Exactly one node has type
//! `videoInput`; its `data.camera_name` binds the pipeline to a camera.
//! The input node is a sentinel — it never executes and has no inbound edges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VIDEO_INPUT_TYPE: &str = "videoInput";

/// A stored pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub graph_data: Graph,
}

fn default_active() -> bool {
    true
}

/// The user-drawn graph: nodes plus directed edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}

/// One node of the graph. `data` is the free-form config map edited in the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Pipeline {
    /// Camera this pipeline is bound to, read from the videoInput node.
    pub fn camera_name(&self) -> Option<&str> {
        self.graph_data
            .nodes
            .iter()
            .find(|n| n.node_type == VIDEO_INPUT_TYPE)
            .and_then(|n| n.data.get("camera_name"))
            .and_then(Value::as_str)
    }
}

impl NodeSpec {
    /// Typed accessor into the config map with a default.
    pub fn config_f64(&self, key: &str, default: f64) -> f64 {
        self.data.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        // The UI serializes numbers loosely; accept both 10 and 10.0.
        self.data
            .get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(default)
    }

    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn config_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.data.get(key).and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }

    /// A list of `[x, y]` points (polygon vertices, line endpoints).
    pub fn config_points(&self, key: &str) -> Option<Vec<[f64; 2]>> {
        let arr = self.data.get(key)?.as_array()?;
        let mut points = Vec::with_capacity(arr.len());
        for p in arr {
            let pair = p.as_array()?;
            if pair.len() != 2 {
                return None;
            }
            points.push([pair[0].as_f64()?, pair[1].as_f64()?]);
        }
        Some(points)
    }
}
