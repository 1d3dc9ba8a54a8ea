//! Connection to the hosted Lark MCP endpoint.

use crate::config::RemoteMcpSettings;
use crate::error::Result;
use crate::lark::LarkClient;
use crate::mcp::transports::StreamableHttpTransport;
use crate::mcp::McpClient;
use tracing::info;

pub const ALLOWED_TOOLS_HEADER: &str = "X-Lark-MCP-Allowed-Tools";
pub const TAT_HEADER: &str = "X-Lark-MCP-TAT";

/// Streamable HTTP transport authorised with a tenant access token.
pub fn remote_transport(
    settings: &RemoteMcpSettings,
    tenant_access_token: &str,
) -> Result<StreamableHttpTransport> {
    StreamableHttpTransport::new(settings.url.clone())
        .with_header(ALLOWED_TOOLS_HEADER, &settings.allowed_tools)?
        .with_header(TAT_HEADER, tenant_access_token)
}

/// Fetch a tenant token for the app and open an MCP session with it.
pub async fn connect_remote(lark: &LarkClient, settings: &RemoteMcpSettings) -> Result<McpClient> {
    let token = lark.tenant_access_token().await?;
    info!(url = %settings.url, allowed_tools = %settings.allowed_tools, "Connecting to remote MCP server");
    McpClient::connect(Box::new(remote_transport(settings, &token)?)).await
}
