//! 凭据注入模型
//!
//! 由注解中的 Secret 名称推导出需要注入的卷名、挂载路径和环境变量。

/// 本组件在初始化器队列中注册的名称
pub const INITIALIZER_NAME: &str = "serviceaccounts.cloud.google.com";

/// 携带 Secret 名称的注解键
pub const SERVICE_ACCOUNT_ANNOTATION: &str = "iam.cloud.google.com/service-account";

/// Secret 挂载根目录
pub const SECRET_MOUNT_ROOT: &str = "/var/run/secrets/gcp";

/// Secret 中的凭据文件名
pub const CREDENTIALS_FILE: &str = "key.json";

/// 生成卷名的前缀
pub const VOLUME_NAME_PREFIX: &str = "gcp-";

/// 注入的环境变量名
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// 对象没有命名空间时使用的默认命名空间
pub const DEFAULT_NAMESPACE: &str = "default";

/// 一次注入的全部参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSpec {
    /// 引用的 Secret 名称
    pub secret_name: String,
    /// 卷名，`gcp-<secret>`
    pub volume_name: String,
    /// 挂载路径，`<root>/<secret>`
    pub mount_path: String,
    /// 凭据文件路径，`<root>/<secret>/key.json`
    pub key_path: String,
}

impl InjectionSpec {
    /// 由 Secret 名称和挂载根目录推导注入参数
    ///
    /// Secret 名称原样使用，不做字符或长度校验。
    pub fn new(secret_name: &str, mount_root: &str) -> Self {
        let mount_path = format!("{}/{}", mount_root.trim_end_matches('/'), secret_name);
        let key_path = format!("{mount_path}/{CREDENTIALS_FILE}");

        Self {
            secret_name: secret_name.to_string(),
            volume_name: format!("{VOLUME_NAME_PREFIX}{secret_name}"),
            mount_path,
            key_path,
        }
    }
}
