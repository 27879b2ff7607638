// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::adapters::Node;
use crate::auth::AuthConfig;

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub auth: Arc<AuthConfig>,
    /// Accept peer identity headers from the proxy in front of the node.
    pub trusted_proxy: bool,
}

impl AppState {
    pub fn new(node: Node, auth: AuthConfig) -> Self {
        Self {
            node: Arc::new(node),
            auth: Arc::new(auth),
            trusted_proxy: false,
        }
    }

    pub fn with_trusted_proxy(mut self, trusted: bool) -> Self {
        self.trusted_proxy = trusted;
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::AppState;
    use crate::adapters::testing::test_node;
    use crate::auth::{AuthConfig, SubjectType, DEFAULT_ACCESS_TTL};
    use crate::emails::MemorySender;
    use crate::peers::mock::{MockConnector, MockPeer};

    pub const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    /// Application state over a test node. The temporary database lives as
    /// long as this value.
    pub struct TestApp {
        pub state: AppState,
        pub remote: Arc<MockPeer>,
        pub connector: Arc<MockConnector>,
        pub email: Arc<MemorySender>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        pub fn operator_token(&self) -> String {
            self.state
                .auth
                .issue("operator", SubjectType::User, None, DEFAULT_ACCESS_TTL)
                .unwrap()
                .0
        }
    }

    pub fn test_app() -> TestApp {
        let t = test_node();
        TestApp {
            state: AppState::new(t.node, AuthConfig::new(TEST_SECRET, "https://originator.example.com")),
            remote: t.remote,
            connector: t.connector,
            email: t.email,
            _dir: t.dir,
        }
    }
}
