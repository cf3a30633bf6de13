// gateway-test-support: Shared test utilities for the fleet gateway.
//
// Provides a mock homebase WebSocket endpoint for integration testing the
// Homebase Link's dial/reconnect/heartbeat/request machinery without real
// hardware.

pub mod mock_ws_server;

pub use mock_ws_server::MockHomebaseServer;
