//! charon 身份认证与授权服务
//! 用户、用户组、权限与刷新令牌的管理，以及会话签发和授权查询

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
