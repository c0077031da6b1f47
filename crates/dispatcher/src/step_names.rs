//! 步骤名称，计算器按名称生成步骤，引擎按名称查找执行器

pub const UPDATE_STORAGE_NODE_STATUS: &str = "UpdateStorageNodeStatus";
pub const ANNOUNCE_STORAGE_NODE: &str = "AnnounceStorageNode";
pub const UNANNOUNCE_STORAGE_NODE: &str = "UnannounceStorageNode";
pub const BOOTSTRAP_NODE: &str = "BootstrapNode";
pub const UPDATE_SCHEMA: &str = "UpdateSchema";
pub const RUN_REPAIR: &str = "RunRepair";
pub const DECOMMISSION_NODE: &str = "DecommissionNode";
pub const ADD_NODE_MAINTENANCE: &str = "AddNodeMaintenance";
