//! Builtin tool implementation types

mod echo;
mod http_request;
mod text_truncate;

pub use echo::EchoTool;
pub use http_request::HttpRequestTool;
pub use text_truncate::TextTruncateTool;

use std::sync::Arc;

use super::registry::ToolFactory;
use super::traits::Tool;
use crate::config::constants::tool_types;

pub fn register_builtins(factory: &mut ToolFactory) {
    factory.register(tool_types::ECHO, |descriptor| {
        Ok(Arc::new(EchoTool::from_descriptor(descriptor)?) as Arc<dyn Tool>)
    });
    factory.register(tool_types::HTTP_REQUEST, |descriptor| {
        Ok(Arc::new(HttpRequestTool::from_descriptor(descriptor)?) as Arc<dyn Tool>)
    });
    factory.register(tool_types::TEXT_TRUNCATE, |descriptor| {
        Ok(Arc::new(TextTruncateTool::from_descriptor(descriptor)?) as Arc<dyn Tool>)
    });
}
