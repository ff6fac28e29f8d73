// 管理接口
pub mod v1;
