//! ROP/target metadata: each out-node's natively configured frame range and
//! skip-existing flag, read by probing the scene with a silent `hython`
//! subprocess.
//!
//! The probe prints a tiny line protocol (`NODE:<path>` followed by
//! `SETTINGS:<json>`) so the interesting data survives whatever chatter the
//! scene load produces around it.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{RopwatchError, RopwatchResult};

/// Out-node types the probe reports.
const SUPPORTED_NODE_TYPES: [&str; 3] = ["rop_geometry", "Redshift_ROP", "opengl"];

/// A target node's native render configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RopSettings {
    pub start: i64,
    pub end: i64,
    pub skip_existing: bool,
}

/// Narrow seam for the metadata lookup, consulted only when no explicit
/// range override is active.
pub trait RopMetadataProvider {
    fn rop_settings(&self, hip_path: &Path, out_node: &str)
    -> RopwatchResult<Option<RopSettings>>;
}

/// Probe implementation backed by a `hython -c` subprocess.
#[derive(Clone, Copy, Debug, Default)]
pub struct HythonProbe;

impl RopMetadataProvider for HythonProbe {
    fn rop_settings(
        &self,
        hip_path: &Path,
        out_node: &str,
    ) -> RopwatchResult<Option<RopSettings>> {
        let nodes = list_out_nodes(hip_path)?;
        Ok(nodes
            .into_iter()
            .find(|(path, _)| path == out_node)
            .map(|(_, settings)| settings))
    }
}

const PROBE_SOURCE: &str = r#"
import json
import os
import sys


class _NullIO(object):
    def write(self, *args):
        pass

    def flush(self):
        pass


old_stdout = sys.stdout
old_stderr = sys.stderr

try:
    sys.stdout = _NullIO()
    sys.stderr = _NullIO()
    os.environ["RS_VERBOSITY_LEVEL"] = "0"

    import hou

    hou.hipFile.load(r"__ROPWATCH_HIP__", suppress_save_prompt=True)

    sys.stdout = old_stdout

    out_context = hou.node("/out")
    if out_context:
        for node in out_context.children():
            if node.type().name() in __ROPWATCH_NODE_TYPES__:
                print("NODE:%s" % node.path())
                settings = {
                    "f1": int(node.parm("f1").eval()) if node.parm("f1") else 1,
                    "f2": int(node.parm("f2").eval()) if node.parm("f2") else 1,
                    "skip_rendered": int(node.parm("RS_outputSkipRendered").eval())
                    if node.parm("RS_outputSkipRendered")
                    else 0,
                }
                print("SETTINGS:%s" % json.dumps(settings))
finally:
    sys.stdout = old_stdout
    sys.stderr = old_stderr
"#;

fn probe_script(hip_path: &Path) -> String {
    let node_types = format!(
        "[{}]",
        SUPPORTED_NODE_TYPES
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    PROBE_SOURCE
        .replace("__ROPWATCH_HIP__", &hip_path.to_string_lossy())
        .replace("__ROPWATCH_NODE_TYPES__", &node_types)
}

/// List every supported out-node of a scene with its native settings.
#[tracing::instrument]
pub fn list_out_nodes(hip_path: &Path) -> RopwatchResult<Vec<(String, RopSettings)>> {
    let output = Command::new("hython")
        .arg("-c")
        .arg(probe_script(hip_path))
        .env("HOU_VERBOSITY", "0")
        .env("RS_VERBOSITY_LEVEL", "0")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            RopwatchError::probe(format!(
                "failed to run hython probe (is hython on PATH?): {e}"
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RopwatchError::probe(format!(
            "hython probe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout)))
}

#[derive(serde::Deserialize)]
struct RawSettings {
    f1: i64,
    f2: i64,
    #[serde(default)]
    skip_rendered: i64,
}

/// Parse the `NODE:`/`SETTINGS:` line protocol. Malformed settings payloads
/// drop that node rather than failing the probe.
pub fn parse_probe_output(output: &str) -> Vec<(String, RopSettings)> {
    let mut nodes = Vec::new();
    let mut current_node: Option<String> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("NODE:") {
            current_node = Some(path.trim().to_string());
        } else if let Some(payload) = line.strip_prefix("SETTINGS:") {
            let Some(node) = current_node.take() else {
                continue;
            };
            match serde_json::from_str::<RawSettings>(payload) {
                Ok(raw) => nodes.push((
                    node,
                    RopSettings {
                        start: raw.f1,
                        end: raw.f2,
                        skip_existing: raw.skip_rendered != 0,
                    },
                )),
                Err(e) => {
                    tracing::debug!(node, "unparseable ROP settings payload: {e}");
                }
            }
        }
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_settings_pairs() {
        let output = "\
Loading scene chatter...
NODE:/out/Redshift_ROP1
SETTINGS:{\"f1\": 1, \"f2\": 100, \"skip_rendered\": 1}
NODE:/out/geo_cache
SETTINGS:{\"f1\": 5, \"f2\": 20, \"skip_rendered\": 0}
";
        let nodes = parse_probe_output(output);
        assert_eq!(
            nodes,
            vec![
                (
                    "/out/Redshift_ROP1".to_string(),
                    RopSettings {
                        start: 1,
                        end: 100,
                        skip_existing: true,
                    }
                ),
                (
                    "/out/geo_cache".to_string(),
                    RopSettings {
                        start: 5,
                        end: 20,
                        skip_existing: false,
                    }
                ),
            ]
        );
    }

    #[test]
    fn malformed_settings_drop_only_that_node() {
        let output = "\
NODE:/out/bad
SETTINGS:{not json}
NODE:/out/good
SETTINGS:{\"f1\": 2, \"f2\": 4}
";
        let nodes = parse_probe_output(output);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].0, "/out/good");
        assert!(!nodes[0].1.skip_existing); // defaulted
    }

    #[test]
    fn settings_without_a_node_are_ignored() {
        let nodes = parse_probe_output("SETTINGS:{\"f1\": 1, \"f2\": 2}\n");
        assert!(nodes.is_empty());
    }

    #[test]
    fn probe_script_embeds_scene_and_node_types() {
        let script = probe_script(Path::new("/shots/a.hip"));
        assert!(script.contains("r\"/shots/a.hip\""));
        assert!(script.contains("\"Redshift_ROP\""));
        assert!(!script.contains("__ROPWATCH_"));
    }
}
