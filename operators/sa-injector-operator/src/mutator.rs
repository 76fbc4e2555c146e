//! 对象变更模块
//!
//! 对通过闸门的对象做两件事：从初始化器队列中弹出队首（即本组件），
//! 以及根据注解注入 Secret 卷、卷挂载和凭据环境变量。
//! 变更作用于独立的副本，原对象保持不变，供补丁引擎做差异比较。

use k8s_openapi::api::core::v1::{EnvVar, KeyToPath, PodSpec, SecretVolumeSource, Volume, VolumeMount};
use sa_injector_common::{pop_pending, InjectionSpec, CREDENTIALS_ENV_VAR, CREDENTIALS_FILE};

use crate::resources::Workload;

/// 变更结果
#[derive(Debug, Clone)]
pub struct Mutation<K> {
    /// 变更后的对象副本
    pub object: K,
    /// 是否发生了凭据注入
    pub modified: bool,
}

/// 凭据注入变更器
#[derive(Debug, Clone)]
pub struct Mutator {
    /// 携带 Secret 名称的注解键
    annotation: String,
    /// Secret 挂载根目录
    secret_mount_root: String,
}

impl Mutator {
    /// 创建新的变更器
    pub fn new(annotation: impl Into<String>, secret_mount_root: impl Into<String>) -> Self {
        Self {
            annotation: annotation.into(),
            secret_mount_root: secret_mount_root.into(),
        }
    }

    /// 复制对象，弹出队首初始化器并注入凭据
    ///
    /// 缺少注解时不注入，但队列弹出依然生效，需要照常提交补丁。
    pub fn mutate<K: Workload>(&self, original: &K) -> Mutation<K> {
        let mut object = original.clone();
        pop_pending(object.initializers_mut());
        let modified = self.inject(Some(&mut object));

        Mutation { object, modified }
    }

    /// 就地注入凭据，返回是否有容器被修改
    pub fn inject<K: Workload>(&self, object: Option<&mut K>) -> bool {
        let Some(object) = object else {
            return false;
        };
        let Some(secret_name) = object.annotation(&self.annotation).map(str::to_owned) else {
            return false;
        };
        let Some(spec) = object.pod_spec_mut() else {
            return false;
        };

        inject_credentials(spec, &InjectionSpec::new(&secret_name, &self.secret_mount_root))
    }
}

/// 向 PodSpec 注入凭据
///
/// 每个容器追加一个只读卷挂载和一个环境变量，整个 PodSpec 只追加一个卷。
/// 没有容器时不做任何修改。
pub fn inject_credentials(spec: &mut PodSpec, injection: &InjectionSpec) -> bool {
    if spec.containers.is_empty() {
        return false;
    }

    for container in &mut spec.containers {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: injection.volume_name.clone(),
                mount_path: injection.mount_path.clone(),
                read_only: Some(true),
                ..Default::default()
            });

        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: CREDENTIALS_ENV_VAR.to_string(),
            value: Some(injection.key_path.clone()),
            ..Default::default()
        });
    }

    spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: injection.volume_name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(injection.secret_name.clone()),
            items: Some(vec![KeyToPath {
                key: CREDENTIALS_FILE.to_string(),
                path: CREDENTIALS_FILE.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    });

    true
}
