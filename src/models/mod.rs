//! 数据模型模块
//! 实体、查询条件、部分更新以及 RPC 请求/响应结构

pub mod auth;
pub mod criteria;
pub mod group;
pub mod patch;
pub mod permission;
pub mod refresh_token;
pub mod user;

use serde::{Deserialize, Serialize};

/// Response of every delete operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub affected: u64,
}

/// Response of operations that return nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}
