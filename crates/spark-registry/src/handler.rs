//! Handler 契约。
//!
//! # 教案式说明
//! - **意图（Why）**：横切行为（挂载、符号链接、审计、模拟）以 Handler 形式挂接到仓库操作上，
//!   不修改存储代码；
//! - **契约（What）**：每个操作类型对应一个带默认空实现的方法，Handler 只覆盖自己关心的
//!   类型。值类返回 `Ok(None)` 表示“不提供结果”，`resource_exists` 返回 `Ok(false)`，
//!   无返回值类返回 `Ok(())`。Handler 通过 [`RequestContext::set_processing_complete`]
//!   宣告操作已被完整处理；
//! - **风险（Trade-offs）**：方法内 panic 会被调度内核捕获并包装为
//!   [`RegistryError::Handler`](crate::RegistryError::Handler)，但 Handler 已产生的副作用不会被撤销。

use crate::{
    context::RequestContext,
    error::Result,
    model::{Association, Collection, Comment, RegistryContextInfo, Resource, Tag},
    mount::LinkTarget,
};

/// 链接能力：由挂载类 Handler 暴露，仓库门面据此定位并移除链接，而不依赖具体类型判断。
pub trait MountProvider {
    /// 本地挂载点。
    fn mount_point(&self) -> &str;

    /// 链接目标。
    fn link_target(&self) -> LinkTarget;
}

/// 仓库操作拦截器。
#[allow(unused_variables)]
pub trait Handler: Send + Sync + 'static {
    /// 用于日志与执行记录的名称。
    fn describe(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// 链接能力探测；非链接 Handler 返回 `None`。
    fn as_mount_provider(&self) -> Option<&dyn MountProvider> {
        None
    }

    fn get(&self, ctx: &mut RequestContext) -> Result<Option<Resource>> {
        Ok(None)
    }

    fn put(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn delete(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    /// `MOVE`；`move` 为关键字，故命名为 `move_resource`。
    fn move_resource(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn copy(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn rename(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn import_resource(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn put_child(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn import_child(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn create_link(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn remove_link(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn create_version(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn restore_version(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_versions(&self, ctx: &mut RequestContext) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn execute_query(&self, ctx: &mut RequestContext) -> Result<Option<Collection>> {
        Ok(None)
    }

    fn search_content(&self, ctx: &mut RequestContext) -> Result<Option<Collection>> {
        Ok(None)
    }

    fn resource_exists(&self, ctx: &mut RequestContext) -> Result<bool> {
        Ok(false)
    }

    fn add_association(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn remove_association(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_associations(&self, ctx: &mut RequestContext) -> Result<Option<Vec<Association>>> {
        Ok(None)
    }

    fn get_all_associations(&self, ctx: &mut RequestContext) -> Result<Option<Vec<Association>>> {
        Ok(None)
    }

    fn apply_tag(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_tags(&self, ctx: &mut RequestContext) -> Result<Option<Vec<Tag>>> {
        Ok(None)
    }

    fn remove_tag(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn add_comment(&self, ctx: &mut RequestContext) -> Result<Option<String>> {
        Ok(None)
    }

    fn edit_comment(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn remove_comment(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_comments(&self, ctx: &mut RequestContext) -> Result<Option<Vec<Comment>>> {
        Ok(None)
    }

    fn rate_resource(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_rating(&self, ctx: &mut RequestContext) -> Result<Option<u8>> {
        Ok(None)
    }

    fn get_average_rating(&self, ctx: &mut RequestContext) -> Result<Option<f32>> {
        Ok(None)
    }

    /// `DUMP`：导出载荷经 [`RequestContext::set_dump`] 写回。
    fn dump(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn restore(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn get_registry_context(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<RegistryContextInfo>> {
        Ok(None)
    }

    fn invoke_aspect(&self, ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }
}
