//! Demo commands

pub mod approval;
pub mod chat;
pub mod counter;

use std::path::Path;
use stepgraph_kernel::config::load_graph_config;
use stepgraph_kernel::workflow::GraphConfig;

/// Load the graph configuration from `path`, or use defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GraphConfig> {
    match path {
        Some(path) => {
            let path = path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8"))?;
            load_graph_config(path).map_err(|report| anyhow::anyhow!("{report:?}"))
        }
        None => Ok(GraphConfig::default()),
    }
}
