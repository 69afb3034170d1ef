pub mod render_graph;

pub use render_graph::{
    AttachmentInfo, AttachmentOperation, NodeExecuteContext, NodeId, NodeTargetDesc, RenderGraph,
};
