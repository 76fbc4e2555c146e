//! 策略合并补丁计算模块
//!
//! 对比原始对象与修改后对象的 JSON 表示，生成 Kubernetes 策略合并补丁
//! （strategic merge patch）。带合并键的列表（如按 `name` 合并的容器列表）
//! 按键逐项比较，而不是按下标整体替换，这样并发修改其他容器的字段不会被覆盖。
//!
//! 规则：
//! - 对象：新增或变化的字段递归写入补丁，删除的字段写为 `null`；
//! - 带合并键的列表：新增元素原样写入，变化元素只写差异并带上合并键，
//!   删除元素写为 `{"<key>": ..., "$patch": "delete"}`；
//! - 其他列表与标量：不相等时整体替换。

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// 补丁中标记删除列表元素的指令
const PATCH_DIRECTIVE: &str = "$patch";

/// 列表合并键表
///
/// 路径由对象字段名以 `.` 连接而成，穿过列表时不追加下标，
/// 例如 `spec.containers.env`。
#[derive(Debug, Clone, Default)]
pub struct MergeSchema {
    keys: HashMap<String, &'static str>,
}

impl MergeSchema {
    /// 创建空的合并键表，所有列表都按整体替换处理
    pub fn new() -> Self {
        Self::default()
    }

    /// 为指定路径的列表登记合并键
    pub fn with_key(mut self, path: &str, key: &'static str) -> Self {
        self.keys.insert(path.to_string(), key);
        self
    }

    /// 查询路径对应的合并键
    pub fn merge_key(&self, path: &str) -> Option<&'static str> {
        self.keys.get(path).copied()
    }

    /// 对象元数据中的合并列表
    fn with_object_meta(self) -> Self {
        self.with_key("metadata.initializers.pending", "name")
            .with_key("metadata.ownerReferences", "uid")
    }

    /// 以 `prefix` 为根的 PodSpec 中的合并列表
    fn with_pod_spec(mut self, prefix: &str) -> Self {
        for containers in ["containers", "initContainers", "ephemeralContainers"] {
            let base = format!("{prefix}.{containers}");
            self = self
                .with_key(&base, "name")
                .with_key(&format!("{base}.env"), "name")
                .with_key(&format!("{base}.volumeMounts"), "mountPath")
                .with_key(&format!("{base}.volumeDevices"), "devicePath")
                .with_key(&format!("{base}.ports"), "containerPort");
        }
        self.with_key(&format!("{prefix}.volumes"), "name")
            .with_key(&format!("{prefix}.imagePullSecrets"), "name")
            .with_key(&format!("{prefix}.hostAliases"), "ip")
    }

    /// core/v1 Pod 的合并键表
    pub fn pod() -> Self {
        Self::new().with_object_meta().with_pod_spec("spec")
    }

    /// apps/v1 Deployment 的合并键表
    pub fn deployment() -> Self {
        Self::new()
            .with_object_meta()
            .with_key("spec.template.metadata.ownerReferences", "uid")
            .with_pod_spec("spec.template.spec")
    }
}

/// 计算两路策略合并补丁
///
/// 两个输入都必须是 JSON 对象。对象没有差异时返回空对象。
pub fn two_way_merge_patch(original: &Value, modified: &Value, schema: &MergeSchema) -> Result<Value> {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            Ok(Value::Object(diff_maps(original, modified, "", schema)?))
        }
        _ => Err(Error::Diff("原始对象与修改后对象都必须是 JSON 对象".to_string())),
    }
}

fn child_path(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn diff_maps(
    original: &Map<String, Value>,
    modified: &Map<String, Value>,
    path: &str,
    schema: &MergeSchema,
) -> Result<Map<String, Value>> {
    let mut patch = Map::new();

    for (field, new_value) in modified {
        match original.get(field) {
            None => {
                patch.insert(field.clone(), new_value.clone());
            }
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => {
                let field_path = child_path(path, field);
                if let Some(value) = diff_values(old_value, new_value, &field_path, schema)? {
                    patch.insert(field.clone(), value);
                }
            }
        }
    }

    for field in original.keys() {
        if !modified.contains_key(field) {
            patch.insert(field.clone(), Value::Null);
        }
    }

    Ok(patch)
}

fn diff_values(
    original: &Value,
    modified: &Value,
    path: &str,
    schema: &MergeSchema,
) -> Result<Option<Value>> {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let patch = diff_maps(original, modified, path, schema)?;
            Ok((!patch.is_empty()).then_some(Value::Object(patch)))
        }
        (Value::Array(original), Value::Array(modified)) => match schema.merge_key(path) {
            Some(key) => {
                let patch = diff_merge_list(original, modified, key, path, schema)?;
                Ok((!patch.is_empty()).then_some(Value::Array(patch)))
            }
            None => Ok(Some(Value::Array(modified.clone()))),
        },
        _ => Ok(Some(modified.clone())),
    }
}

fn merge_key_value<'a>(element: &'a Value, key: &str, path: &str) -> Result<(&'a Map<String, Value>, &'a Value)> {
    let map = element
        .as_object()
        .ok_or_else(|| Error::Diff(format!("{path} 中的元素不是对象")))?;
    let value = map
        .get(key)
        .ok_or_else(|| Error::Diff(format!("{path} 中的元素缺少合并键 {key}")))?;
    Ok((map, value))
}

fn diff_merge_list(
    original: &[Value],
    modified: &[Value],
    key: &str,
    path: &str,
    schema: &MergeSchema,
) -> Result<Vec<Value>> {
    let mut old_by_key = Vec::with_capacity(original.len());
    for element in original {
        old_by_key.push(merge_key_value(element, key, path)?);
    }

    let mut patch = Vec::new();
    let mut kept = Vec::with_capacity(modified.len());

    for element in modified {
        let (new_map, key_value) = merge_key_value(element, key, path)?;
        kept.push(key_value);

        match old_by_key.iter().find(|(_, old_key)| *old_key == key_value) {
            None => patch.push(element.clone()),
            Some((old_map, _)) if *old_map == new_map => {}
            Some((old_map, _)) => {
                let mut element_patch = diff_maps(old_map, new_map, path, schema)?;
                if !element_patch.is_empty() {
                    element_patch.insert(key.to_string(), key_value.clone());
                    patch.push(Value::Object(element_patch));
                }
            }
        }
    }

    for (_, old_key) in &old_by_key {
        if !kept.contains(old_key) {
            let mut deletion = Map::new();
            deletion.insert(key.to_string(), (*old_key).clone());
            deletion.insert(PATCH_DIRECTIVE.to_string(), Value::String("delete".to_string()));
            patch.push(Value::Object(deletion));
        }
    }

    Ok(patch)
}
