//! 存储节点生命周期编排
//!
//! 新节点依次经历 ANNOUNCE → BOOTSTRAP → ADD_NODE_MAINTENANCE → NORMAL。
//! 每次状态推进都由远程操作的完成回调或集群成员事件驱动，编排器自身从不等待远程操作。
//! 任何一步被取消或失败都会在相关节点上记录错误并停止自动推进，等待运维人员处理。

use std::sync::Arc;

use async_trait::async_trait;
use maintenance_core::config::ClusterSettings;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, JobFailure, JobType, OperationMode, StorageMaintenanceJob, StorageNode,
};
use maintenance_domain::ports::{
    operations, MembershipEvent, OperationCompletion, OperationHandle, OperationStatus,
    RemoteOperationDispatcher,
};
use maintenance_domain::replication_policy::schema_changes_for_addition;
use maintenance_domain::repositories::StorageNodeRepository;
use maintenance_infrastructure::MaintenanceMetrics;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::MaintenanceJobObserver;
use crate::queue::MaintenanceQueue;

pub struct StorageNodeLifecycle {
    node_repo: Arc<dyn StorageNodeRepository>,
    queue: Arc<MaintenanceQueue>,
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
    cluster: ClusterSettings,
    metrics: MaintenanceMetrics,
    /// 同一时刻只允许一个回调推进节点状态
    transition_lock: Mutex<()>,
}

impl StorageNodeLifecycle {
    pub fn new(
        node_repo: Arc<dyn StorageNodeRepository>,
        queue: Arc<MaintenanceQueue>,
        dispatcher: Arc<dyn RemoteOperationDispatcher>,
        cluster: ClusterSettings,
        metrics: MaintenanceMetrics,
    ) -> Self {
        Self {
            node_repo,
            queue,
            dispatcher,
            cluster,
            metrics,
            transition_lock: Mutex::new(()),
        }
    }

    /// 把新节点通告给集群
    ///
    /// 逐个通知现有的 NORMAL 节点，每次只通知一个，后续节点在前一个成功后再通知。
    pub async fn announce_storage_node(&self, node: StorageNode) -> MaintenanceResult<StorageNode> {
        let _guard = self.transition_lock.lock().await;
        info!(address = %node.address, "向存储集群通告新节点");

        let cluster_nodes = self.node_repo.find_by_mode(OperationMode::Normal).await?;
        if cluster_nodes.is_empty() {
            return Err(MaintenanceError::InvalidTopology(format!(
                "没有可通告 {} 的 NORMAL 节点",
                node.address
            )));
        }

        let mut new_node = match self.node_repo.find_by_address(&node.address).await? {
            Some(existing) => existing,
            None => self.node_repo.create(&node).await?,
        };
        new_node.set_operation_mode(OperationMode::Announce);
        new_node.clear_error();
        let new_node = self.node_repo.update(&new_node).await?;
        self.metrics.record_node_transition(OperationMode::Announce.as_str());

        for mut cluster_node in cluster_nodes.iter().cloned() {
            cluster_node.maintenance_pending = true;
            self.node_repo.update(&cluster_node).await?;
        }

        let mut addresses: Vec<String> = cluster_nodes.iter().map(|n| n.address.clone()).collect();
        addresses.push(new_node.address.clone());

        if let Some(first) = self.take_from_maintenance_queue().await? {
            self.announce_to(&first, &new_node, &addresses).await?;
        }
        Ok(new_node)
    }

    /// 让新节点准备加入集群
    pub async fn bootstrap_storage_node(&self, node: &StorageNode) -> MaintenanceResult<OperationHandle> {
        let _guard = self.transition_lock.lock().await;
        let mut addresses: Vec<String> = self
            .node_repo
            .find_by_mode(OperationMode::Normal)
            .await?
            .into_iter()
            .map(|n| n.address)
            .collect();
        addresses.push(node.address.clone());

        let mut new_node = self
            .node_repo
            .find_by_address(&node.address)
            .await?
            .ok_or_else(|| MaintenanceError::StorageNodeNotFound {
                address: node.address.clone(),
            })?;
        new_node.set_operation_mode(OperationMode::Bootstrap);
        self.node_repo.update(&new_node).await?;
        self.metrics.record_node_transition(OperationMode::Bootstrap.as_str());

        self.prepare_for_bootstrap(&new_node, &addresses).await
    }

    /// 处理远程操作的状态更新，错误记录到新节点上而不向上传播
    pub async fn handle_operation_update(&self, completion: &OperationCompletion) {
        if completion.status == OperationStatus::InProgress {
            return;
        }

        let (mode, result) = match completion.operation_name.as_str() {
            operations::UPDATE_KNOWN_NODES => {
                if self.owned_by_job(completion).await {
                    return;
                }
                (OperationMode::Announce, self.handle_update_known_nodes(completion).await)
            }
            operations::PREPARE_FOR_BOOTSTRAP => {
                if self.owned_by_job(completion).await {
                    return;
                }
                (OperationMode::Bootstrap, self.handle_prepare_for_bootstrap(completion).await)
            }
            operations::ADD_NODE_MAINTENANCE => (
                OperationMode::AddNodeMaintenance,
                self.handle_add_node_maintenance(completion).await,
            ),
            _ => return,
        };

        if let Err(e) = result {
            let message = format!(
                "由于处理操作 {} 时出现意外错误，存储节点部署已中止",
                completion.operation_name
            );
            error!(operation_id = completion.operation_id, "{message}: {e}");
            self.log_error(mode, &format!("{message}。根本原因: {e}")).await;
        }
    }

    pub async fn handle_membership_event(&self, event: &MembershipEvent) -> MaintenanceResult<()> {
        match event {
            MembershipEvent::NodeJoined { address } => {
                self.perform_add_node_maintenance_if_necessary(address).await?;
            }
            MembershipEvent::NodeLeft { address } => {
                info!(address = %address, "存储节点已离开集群");
            }
        }
        Ok(())
    }

    /// 节点加入集群后，如果仍处于 BOOTSTRAP 则开始加入后的维护
    pub async fn perform_add_node_maintenance_if_necessary(
        &self,
        address: &str,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let _guard = self.transition_lock.lock().await;
        let Some(node) = self.node_repo.find_by_address(address).await? else {
            warn!(address, "加入集群的节点未登记，跳过");
            return Ok(None);
        };

        if node.operation_mode != OperationMode::Bootstrap {
            info!(address, mode = %node.operation_mode, "节点已完成引导，跳过加入后的维护");
            return Ok(None);
        }
        if self.deploy_job_targets(address).await? {
            info!(address, "节点的部署作业会执行加入后的维护，跳过");
            return Ok(None);
        }

        self.perform_add_node_maintenance(node).await.map(Some)
    }

    /// 把 `mode` 模式下的新节点标记为错误
    pub async fn log_error(&self, mode: OperationMode, message: &str) {
        let _guard = self.transition_lock.lock().await;
        let result = async {
            let mut new_node = self.find_new_node(mode).await?;
            new_node.record_failure(message, None);
            self.node_repo.update(&new_node).await?;
            MaintenanceResult::Ok(())
        }
        .await;

        if let Err(e) = result {
            error!("无法在存储节点上记录错误: {e}");
        }
    }

    async fn handle_update_known_nodes(&self, completion: &OperationCompletion) -> MaintenanceResult<()> {
        let _guard = self.transition_lock.lock().await;
        let mut node = self.required_node(&completion.target_address).await?;

        if !completion.is_success() {
            let new_node = self.find_new_node(OperationMode::Announce).await?;
            return self.abort_deployment(node, new_node, completion).await;
        }

        node.maintenance_pending = false;
        self.node_repo.update(&node).await?;

        let mut new_node = self.find_new_node(OperationMode::Announce).await?;
        let addresses = self
            .addresses_parameter(completion, job_properties::ADDRESSES, &new_node)
            .await?;

        match self.take_from_maintenance_queue().await? {
            Some(next) => {
                self.announce_to(&next, &new_node, &addresses).await?;
            }
            None => {
                info!(address = %new_node.address, "新节点已通告给所有集群节点");
                new_node.set_operation_mode(OperationMode::Bootstrap);
                let new_node = self.node_repo.update(&new_node).await?;
                self.metrics.record_node_transition(OperationMode::Bootstrap.as_str());
                self.prepare_for_bootstrap(&new_node, &addresses).await?;
            }
        }
        Ok(())
    }

    /// 引导成功后什么也不做，等待集群成员事件
    async fn handle_prepare_for_bootstrap(&self, completion: &OperationCompletion) -> MaintenanceResult<()> {
        let _guard = self.transition_lock.lock().await;
        if completion.is_success() {
            debug!(address = %completion.target_address, "引导准备完成，等待节点加入集群");
            return Ok(());
        }

        let mut new_node = self.required_node(&completion.target_address).await?;
        error!(
            address = %new_node.address,
            operation_id = completion.operation_id,
            "引导准备{}，部署已中止: {}",
            outcome_word(completion.status),
            completion.failure_message()
        );
        new_node.record_failure(
            format!(
                "由于操作 [{}] {}，部署已中止",
                completion.operation_name,
                outcome_word(completion.status)
            ),
            Some(completion.operation_id),
        );
        self.node_repo.update(&new_node).await?;
        Ok(())
    }

    async fn handle_add_node_maintenance(&self, completion: &OperationCompletion) -> MaintenanceResult<()> {
        let _guard = self.transition_lock.lock().await;
        let mut node = self.required_node(&completion.target_address).await?;

        if !completion.is_success() {
            let new_node = self.find_new_node(OperationMode::AddNodeMaintenance).await?;
            return self.abort_deployment(node, new_node, completion).await;
        }

        info!(address = %node.address, "节点已完成新增节点维护");
        node.maintenance_pending = false;
        self.node_repo.update(&node).await?;

        if self.take_from_maintenance_queue().await?.is_none() {
            let mut new_node = self.find_new_node(OperationMode::AddNodeMaintenance).await?;
            new_node.set_operation_mode(OperationMode::Normal);
            new_node.maintenance_pending = false;
            self.node_repo.update(&new_node).await?;
            self.metrics.record_node_transition(OperationMode::Normal.as_str());
            info!(address = %new_node.address, "新增节点的集群维护全部完成，节点进入 NORMAL");
        }
        Ok(())
    }

    async fn perform_add_node_maintenance(
        &self,
        mut node: StorageNode,
    ) -> MaintenanceResult<StorageMaintenanceJob> {
        node.set_operation_mode(OperationMode::AddNodeMaintenance);
        node.maintenance_pending = true;
        let node = self.node_repo.update(&node).await?;
        self.metrics.record_node_transition(OperationMode::AddNodeMaintenance.as_str());

        let mut existing = Vec::new();
        for mut cluster_node in self.node_repo.find_by_mode(OperationMode::Normal).await? {
            cluster_node.maintenance_pending = true;
            self.node_repo.update(&cluster_node).await?;
            existing.push(cluster_node.address);
        }
        existing.sort();

        let changes = schema_changes_for_addition(existing.len(), existing.len() + 1)?;
        let mut seeds = existing.clone();
        seeds.push(node.address.clone());

        let mut job = StorageMaintenanceJob::new(
            JobType::AddNodeMaintenance,
            format!("Add node maintenance for {}", node.address),
            json!({
                job_properties::TARGET: node.address,
                job_properties::RUN_REPAIR: changes.repair_needed(),
                job_properties::SEEDS_LIST: seeds,
            }),
        )
        .with_cluster_snapshot(existing);
        if changes.replication_factor_changed {
            job.set_property(job_properties::REPLICATION_FACTOR, json!(changes.replication_factor));
            if let Some(seconds) = changes.gc_grace_seconds {
                job.set_property(job_properties::GC_GRACE_SECONDS, json!(seconds));
            }
        }

        info!(
            address = %node.address,
            replication_factor = changes.replication_factor,
            run_repair = changes.repair_needed(),
            "开始新增节点后的集群维护"
        );
        self.queue.schedule_maintenance(job).await
    }

    /// 在两端节点上记录互补的错误信息
    async fn abort_deployment(
        &self,
        mut node: StorageNode,
        mut new_node: StorageNode,
        completion: &OperationCompletion,
    ) -> MaintenanceResult<()> {
        let outcome = outcome_word(completion.status);
        error!(
            address = %node.address,
            operation_id = completion.operation_id,
            "操作 [{}] {}，部署已中止: {}",
            completion.operation_name,
            outcome,
            completion.failure_message()
        );

        if node.address == new_node.address {
            new_node.record_failure(
                format!("由于操作 [{}] {}，部署已中止", completion.operation_name, outcome),
                Some(completion.operation_id),
            );
            self.node_repo.update(&new_node).await?;
            return Ok(());
        }

        new_node.record_failure(
            format!("由于节点 {} 上的远程操作{}，部署已中止", node.address, outcome),
            Some(completion.operation_id),
        );
        node.record_failure(
            format!(
                "由于操作 [{}] {}，{} 的部署已中止",
                completion.operation_name, outcome, new_node.address
            ),
            Some(completion.operation_id),
        );
        self.node_repo.update(&new_node).await?;
        self.node_repo.update(&node).await?;
        Ok(())
    }

    async fn announce_to(
        &self,
        cluster_node: &StorageNode,
        new_node: &StorageNode,
        addresses: &[String],
    ) -> MaintenanceResult<OperationHandle> {
        info!(
            address = %cluster_node.address,
            new_node = %new_node.address,
            "向集群节点通告新节点"
        );
        self.dispatcher
            .schedule_operation(
                &cluster_node.address,
                operations::UPDATE_KNOWN_NODES,
                json!({ job_properties::ADDRESSES: addresses }),
            )
            .await
    }

    async fn prepare_for_bootstrap(
        &self,
        new_node: &StorageNode,
        addresses: &[String],
    ) -> MaintenanceResult<OperationHandle> {
        info!(address = %new_node.address, "准备引导新节点加入集群");
        self.dispatcher
            .schedule_operation(
                &new_node.address,
                operations::PREPARE_FOR_BOOTSTRAP,
                json!({
                    job_properties::CQL_PORT: self.cluster.cql_port,
                    job_properties::GOSSIP_PORT: self.cluster.gossip_port,
                    job_properties::ADDRESSES: addresses,
                }),
            )
            .await
    }

    /// 下一个仍待处理的 NORMAL 节点
    async fn take_from_maintenance_queue(&self) -> MaintenanceResult<Option<StorageNode>> {
        Ok(self
            .node_repo
            .find_maintenance_pending(OperationMode::Normal)
            .await?
            .into_iter()
            .next())
    }

    async fn find_new_node(&self, mode: OperationMode) -> MaintenanceResult<StorageNode> {
        self.node_repo
            .find_by_mode(mode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MaintenanceError::Internal(format!("没有处于 {mode} 模式的新节点")))
    }

    async fn required_node(&self, address: &str) -> MaintenanceResult<StorageNode> {
        self.node_repo
            .find_by_address(address)
            .await?
            .ok_or_else(|| MaintenanceError::StorageNodeNotFound {
                address: address.to_string(),
            })
    }

    /// 取回调参数中的地址列表，缺失时按当前集群重新计算
    async fn addresses_parameter(
        &self,
        completion: &OperationCompletion,
        key: &str,
        new_node: &StorageNode,
    ) -> MaintenanceResult<Vec<String>> {
        if let Some(addresses) = completion.parameters.get(key).and_then(Value::as_array) {
            return Ok(addresses
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect());
        }

        let mut addresses: Vec<String> = self
            .node_repo
            .find_by_mode(OperationMode::Normal)
            .await?
            .into_iter()
            .map(|n| n.address)
            .collect();
        addresses.push(new_node.address.clone());
        Ok(addresses)
    }

    async fn owned_by_job(&self, completion: &OperationCompletion) -> bool {
        match self.queue.find_job_by_operation(completion.operation_id).await {
            Ok(job) => job.is_some(),
            Err(e) => {
                warn!(operation_id = completion.operation_id, "查询操作所属作业失败: {e}");
                false
            }
        }
    }

    async fn deploy_job_targets(&self, address: &str) -> MaintenanceResult<bool> {
        Ok(self
            .queue
            .load_queue()
            .await?
            .iter()
            .any(|job| job.job_type == JobType::Deploy && job.target() == Some(address)))
    }
}

/// 新增节点维护作业被中止时，把失败记录到新节点上并暂停该作业，直到错误被清除
#[async_trait]
impl MaintenanceJobObserver for StorageNodeLifecycle {
    async fn job_aborted(&self, job: &StorageMaintenanceJob, failure: &JobFailure) {
        if job.job_type != JobType::AddNodeMaintenance {
            return;
        }
        let Some(address) = job.target() else {
            return;
        };

        let _guard = self.transition_lock.lock().await;
        let result = async {
            let mut new_node = self.required_node(address).await?;
            error!(
                address = %new_node.address,
                job_number = job.job_number,
                step = %failure.step_name,
                "新增节点维护步骤失败，部署已中止: {}",
                failure.message
            );
            new_node.record_failure(
                format!(
                    "由于维护步骤 [{}] 失败，部署已中止: {}",
                    failure.step_name, failure.message
                ),
                None,
            );
            self.node_repo.update(&new_node).await?;
            MaintenanceResult::Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(job_number = job.job_number, "无法在存储节点上记录错误: {e}");
        }
    }

    async fn is_held(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<bool> {
        if job.job_type != JobType::AddNodeMaintenance {
            return Ok(false);
        }
        let Some(address) = job.target() else {
            return Ok(false);
        };
        Ok(self
            .node_repo
            .find_by_address(address)
            .await?
            .is_some_and(|node| node.error_message.is_some()))
    }
}

fn outcome_word(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Canceled => "被取消",
        _ => "失败",
    }
}
