//! Static capability and tool listing built from the service registry.

use crate::protocol::MCP_PROTOCOL_VERSION;
use crate::registry::{ServiceDefinition, ServiceRegistry};
use serde_json::{Value, json};

/// Tool name clients call to register their mounts.
pub const REGISTER_CLIENT_TOOL: &str = "fabric/registerClient";

/// Name announced in `serverInfo`.
pub const SERVER_NAME: &str = "reactor-fabric";

/// Returns the `tools` array: the registration tool followed by every
/// declared service tool as `<service>/<tool>`.
#[must_use]
pub fn tool_listing(registry: &ServiceRegistry) -> Vec<Value> {
    let mut tools = vec![register_client_tool()];
    tools.extend(registry.services().flat_map(service_tools));
    tools
}

/// Returns the `initialize` result.
#[must_use]
pub fn initialize_result(registry: &ServiceRegistry) -> Value {
    let services: Vec<Value> = registry
        .services()
        .map(|service| {
            json!({
                "name": service.name().as_str(),
                "image": service.image(),
                "containerStrategy": service.strategy().as_str(),
            })
        })
        .collect();

    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": { "listChanged": false },
        },
        "tools": tool_listing(registry),
        "services": services,
    })
}

fn service_tools(service: &ServiceDefinition) -> impl Iterator<Item = Value> + '_ {
    service.tools().iter().map(move |tool| {
        json!({
            "name": format!("{}/{}", service.name(), tool.name()),
            "description": tool.description(),
            "inputSchema": { "type": "object" },
        })
    })
}

fn register_client_tool() -> Value {
    json!({
        "name": REGISTER_CLIENT_TOOL,
        "description": "Register host directories to mount into service containers",
        "inputSchema": {
            "type": "object",
            "properties": {
                "mounts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "source": { "type": "string" },
                            "target": { "type": "string" },
                            "readOnly": { "type": "boolean" },
                        },
                        "required": ["source", "target"],
                    },
                },
            },
            "required": ["mounts"],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version: "1.0"
orchestrator:
  allowed_mount_roots: ["/home"]
mcp_services:
  git:
    image: alpine/git
    tools:
      - name: status
        description: Show the working tree status
  search:
    image: example/search:1
    container_strategy: smart_refresh
"#;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::load_and_validate(CONFIG.as_bytes()).expect("valid config")
    }

    #[test]
    fn listing_starts_with_registration_tool() {
        let names: Vec<String> = tool_listing(&registry())
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str).map(str::to_owned))
            .collect();

        assert_eq!(names, vec!["fabric/registerClient", "git/status"]);
    }

    #[test]
    fn initialize_announces_services() {
        let result = initialize_result(&registry());

        assert_eq!(result["protocolVersion"], json!(MCP_PROTOCOL_VERSION));
        assert_eq!(result["serverInfo"]["name"], json!(SERVER_NAME));
        assert_eq!(
            result["services"][1],
            json!({
                "name": "search",
                "image": "example/search:1",
                "containerStrategy": "smart_refresh",
            })
        );
    }
}
