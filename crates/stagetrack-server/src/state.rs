//! Shared application state handed to every handler.

use std::sync::Arc;

use stagetrack_core::engine::MetricEngine;
use stagetrack_core::sink::MetricSink;
use stagetrack_core::transition::TransitionService;
use stagetrack_core::users::UserService;

use crate::middleware::jwt::JwtConfig;

#[derive(Clone)]
pub struct AppState {
    pub transitions: Arc<TransitionService>,
    pub users: Arc<UserService>,
    pub engine: Arc<MetricEngine>,
    pub sink: Arc<MetricSink>,
    pub jwt: JwtConfig,
}
