//! GET /swagger/openapi.json — the API description document.
//!
//! Built in code; the surface is small enough that a generator would be
//! heavier than the document itself.

use axum::Json;
use serde_json::{json, Value};

pub async fn openapi() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "stagetrack",
            "description": "Client onboarding stage tracking and business metrics.",
            "version": "0.1.0"
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            }
        },
        "paths": {
            "/auth/register": { "post": { "summary": "Register a user (role forced to manager), returns a bearer token", "responses": { "201": { "description": "Created" } } } },
            "/auth/login": { "post": { "summary": "Verify credentials, returns a bearer token", "responses": { "200": { "description": "OK" } } } },
            "/clients": {
                "get": { "summary": "List clients with filters and pagination", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } },
                "post": { "summary": "Create a client on its initial stage", "security": [{ "bearerAuth": [] }], "responses": { "201": { "description": "Created" } } }
            },
            "/clients/{id}": {
                "get": { "summary": "Get a client", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } },
                "delete": { "summary": "Deactivate a client", "security": [{ "bearerAuth": [] }], "responses": { "204": { "description": "No Content" } } }
            },
            "/clients/{id}/stage": {
                "put": { "summary": "Apply a stage transition", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } }
            },
            "/users": {
                "get": { "summary": "List users", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } },
                "post": { "summary": "Create a user", "security": [{ "bearerAuth": [] }], "responses": { "201": { "description": "Created" } } }
            },
            "/users/{id}": {
                "get": { "summary": "Get a user", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } },
                "put": { "summary": "Update a user (role changes require super_user)", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } },
                "delete": { "summary": "Delete a user", "security": [{ "bearerAuth": [] }], "responses": { "204": { "description": "No Content" } } }
            },
            "/metrics": {
                "get": { "summary": "Query the metric catalog by type and interval", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } }
            },
            "/metrics/calculate": {
                "get": { "summary": "Trigger a metric calculation run for an interval", "security": [{ "bearerAuth": [] }], "responses": { "200": { "description": "OK" } } }
            },
            "/metrics/prometheus": {
                "get": { "summary": "Prometheus text exposition of the latest metric values", "responses": { "200": { "description": "OK" } } }
            },
            "/health": { "get": { "summary": "Liveness probe", "responses": { "200": { "description": "OK" } } } }
        }
    }))
}
