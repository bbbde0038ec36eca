use parley_tools::ToolDescriptor;
use serde_json::Value;

use crate::protocol::ListedTool;

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpTool {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl McpTool {
    pub(crate) fn from_listed(server_id: &str, listed: ListedTool) -> Self {
        Self {
            server_id: server_id.to_owned(),
            name: listed.name,
            description: listed.description.unwrap_or_default(),
            input_schema: listed.input_schema,
        }
    }

    /// `server_id:name`, unique across servers.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server_id, self.name)
    }

    #[must_use]
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::from_input_schema(&self.name, &self.description, &self.input_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_tools::ParamType;
    use serde_json::json;

    fn listed() -> ListedTool {
        serde_json::from_value(json!({
            "name": "search",
            "description": "Search the docs",
            "inputSchema": {
                "type": "object",
                "properties": {"q": {"type": "string"}, "limit": {"type": "integer"}},
                "required": ["q"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn qualified_name() {
        let tool = McpTool::from_listed("docs", listed());
        assert_eq!(tool.qualified_name(), "docs:search");
    }

    #[test]
    fn descriptor_keeps_schema_types() {
        let desc = McpTool::from_listed("docs", listed()).descriptor();
        assert_eq!(desc.name, "search");
        assert_eq!(desc.description, "Search the docs");
        assert!(desc.find_param("q").unwrap().required);
        assert_eq!(desc.find_param("limit").unwrap().ty, ParamType::Integer);
    }

    #[test]
    fn missing_description_is_empty() {
        let listed: ListedTool = serde_json::from_value(json!({"name": "bare"})).unwrap();
        let tool = McpTool::from_listed("docs", listed);
        assert_eq!(tool.description, "");
    }
}
