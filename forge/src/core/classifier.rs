//! Deterministic classification of routing replies.

use serde::Serialize;

use crate::error::{ForgeError, Result};

/// Treatment chosen for a work item. Computed fresh each time an item is visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    NeedsDetail,
    NeedsSplit,
    ReadyToFinalize,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::NeedsDetail, Route::NeedsSplit, Route::ReadyToFinalize];

    /// The literal token the model must answer with.
    pub fn token(self) -> &'static str {
        match self {
            Route::NeedsDetail => "needs-detail",
            Route::NeedsSplit => "needs-split",
            Route::ReadyToFinalize => "ready-to-finalize",
        }
    }
}

/// Classify a routing reply.
///
/// The reply is trimmed and lower-cased and must then equal one of the three
/// route tokens exactly. Anything else is a [`ForgeError::RoutingContractViolation`];
/// there is no fuzzy matching and no default.
pub fn classify_route_reply(reply: &str) -> Result<Route> {
    let normalized = reply.trim().to_lowercase();
    Route::ALL
        .into_iter()
        .find(|route| route.token() == normalized)
        .ok_or_else(|| ForgeError::RoutingContractViolation {
            reply: reply.to_string(),
        })
}
