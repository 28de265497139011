//! Partial uploads: declare a part count, receive numbered parts, assemble.

use crate::error::{NodeError, NodeResult};
use crate::ingest;
use crate::service::NodeService;
use crate::update::UpdateRequest;
use futures::TryStreamExt;
use shoal_core::Node;
use shoal_core::node::{Compression, NodeBody, PartFile, PartsState};
use shoal_storage::{ImportMode, Segment};
use std::io;
use tokio_util::io::StreamReader;
use tracing::info;

/// What the `parts` parameter asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PartsCommand {
    Fixed(u32),
    Unknown,
    Close,
}

fn parse_command(value: &str) -> NodeResult<PartsCommand> {
    match value {
        "unknown" => Ok(PartsCommand::Unknown),
        "close" => Ok(PartsCommand::Close),
        count => match count.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(PartsCommand::Fixed(n)),
            _ => Err(NodeError::invalid(format!(
                "parts must be an integer >= 1, unknown or close, got {count}"
            ))),
        },
    }
}

impl NodeService {
    pub(crate) async fn apply_parts(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        let command = request.get("parts").map(parse_command).transpose()?;

        match command {
            Some(PartsCommand::Fixed(_)) | Some(PartsCommand::Unknown)
                if matches!(node.body, NodeBody::Parts(_)) =>
            {
                return Err(NodeError::invalid("parts already set"));
            }
            Some(PartsCommand::Fixed(count)) => {
                node.body = NodeBody::Parts(PartsState::fixed(count, parse_compression(request)?));
            }
            Some(PartsCommand::Unknown) => {
                node.body = NodeBody::Parts(PartsState::variable(parse_compression(request)?));
            }
            Some(PartsCommand::Close) | None => {
                if !matches!(node.body, NodeBody::Parts(_)) {
                    return Err(NodeError::invalid("node is not a parts node"));
                }
            }
        }

        let mut files: Vec<_> = request.part_files().collect();
        files.sort_by_key(|(n, _)| *n);
        for (index, file) in files {
            self.add_part(node, index, &file.name, &file.path).await?;
        }

        let ready = match &node.body {
            NodeBody::Parts(state) if command == Some(PartsCommand::Close) => {
                if !state.varlen {
                    return Err(NodeError::invalid(
                        "only variable-length parts nodes can be closed",
                    ));
                }
                true
            }
            NodeBody::Parts(state) => state.is_complete(),
            _ => false,
        };
        if ready {
            self.assemble_parts(node).await?;
        }
        Ok(())
    }

    async fn add_part(
        &self,
        node: &mut Node,
        index: u32,
        name: &str,
        staged: &std::path::Path,
    ) -> NodeResult<()> {
        let NodeBody::Parts(state) = &mut node.body else {
            return Err(NodeError::invalid("node is not a parts node"));
        };
        if index == 0 {
            return Err(NodeError::invalid("part numbers start at 1"));
        }
        if let Some(count) = state.count {
            if index > count {
                return Err(NodeError::invalid(format!(
                    "part {index} out of range for {count} parts"
                )));
            }
            if state.has_part(index) {
                return Err(NodeError::invalid(format!("part {index} already uploaded")));
            }
        }

        let dest = self.storage.layout().part_path(&node.id, index);
        self.storage
            .import_file(staged, &dest, ImportMode::Move)
            .await?;
        let digest = self.storage.digest_file(&dest).await?;

        state.parts.retain(|p| p.index != index);
        state.parts.push(PartFile {
            index,
            name: name.to_string(),
            checksum: digest.checksum.to_hex(),
        });
        state.parts.sort_by_key(|p| p.index);
        state.length = state.parts.len() as u32;
        Ok(())
    }

    /// Concatenate the received parts in numeric order into the data file.
    async fn assemble_parts(&self, node: &mut Node) -> NodeResult<()> {
        let NodeBody::Parts(state) = &node.body else {
            return Err(NodeError::Internal("assembling a node without parts".into()));
        };
        let layout = self.storage.layout();

        let mut segments = Vec::with_capacity(state.parts.len());
        for part in &state.parts {
            let path = layout.part_path(&node.id, part.index);
            let size = tokio::fs::metadata(&path).await?.len();
            segments.push(Segment::whole(path, size));
        }
        let compression = state.compression;
        let name = if node.file.name.is_empty() {
            state.parts.first().map_or_else(String::new, |p| {
                compression
                    .map_or(p.name.as_str(), |c| c.strip_suffix(&p.name))
                    .to_string()
            })
        } else {
            node.file.name.clone()
        };
        let part_count = state.parts.len();

        let stream = self.storage.read_segments(segments).await?;
        let reader = StreamReader::new(stream.map_err(io::Error::other));
        let staged = self.storage.temp_path();
        let digest = ingest::write_stream(reader, compression, &staged).await?;
        self.install(&staged, &layout.data_path(&node.id)).await?;

        node.body = NodeBody::Plain;
        node.set_file(name, digest.size, digest.checksum.to_hex(), self.config.chunk_size);
        self.storage.remove_dir(&layout.parts_dir(&node.id)).await?;
        info!(node_id = %node.id, parts = part_count, size = digest.size, "parts assembled");
        Ok(())
    }
}

fn parse_compression(request: &UpdateRequest) -> NodeResult<Option<Compression>> {
    request
        .get("compression")
        .filter(|v| !v.is_empty())
        .map(|value| {
            Compression::parse(value)
                .ok_or_else(|| NodeError::invalid(format!("unsupported compression: {value}")))
        })
        .transpose()
}
