//! 配置文档处理模块
//!
//! 该模块实现无类型配置树（嵌套键值文档）的处理：递归深度合并、
//! 空值（null）裁剪以及最终 YAML 渲染。配置树以 `serde_json::Value`
//! 表示，覆盖文档中的值始终优先于基础文档。

use serde_json::{Map, Value};

use crate::error::Result;

/// 将覆盖文档递归合并进基础文档。
///
/// 合并规则：
/// - 覆盖值为 null 时跳过，不会抹掉基础值，也不会引入 null；
/// - 两侧在同一键上均为嵌套映射时递归合并；
/// - 其余情况覆盖值整体取胜，包括标量与映射的互相替换。
pub fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        if value.is_null() {
            continue;
        }
        match (base.get_mut(&key), value) {
            (Some(Value::Object(base_child)), Value::Object(overlay_child)) => {
                deep_merge(base_child, overlay_child);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// 递归移除文档中值为 null 的键。
///
/// 嵌套映射在裁剪后变空时连同其键一起移除。该函数应在合并之前
/// 作用于用户覆盖文档，使显式的 "present-but-null" 字段不会污染
/// 最终结果。
pub fn prune_nulls(map: &mut Map<String, Value>) {
    map.retain(|_, value| match value {
        Value::Null => false,
        Value::Object(child) => {
            prune_nulls(child);
            !child.is_empty()
        }
        _ => true,
    });
}

/// 将配置文档渲染为 YAML 字符串
pub fn render_yaml(map: &Map<String, Value>) -> Result<String> {
    Ok(serde_yaml::to_string(map)?)
}

/// 从任意 `Value` 中提取映射；非映射值视为空文档
pub fn as_document(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn prune_nulls_removes_top_level_nulls() {
        let mut doc = object(json!({"key1": "value1", "key2": null, "key3": "value3"}));
        prune_nulls(&mut doc);
        assert_eq!(Value::Object(doc), json!({"key1": "value1", "key3": "value3"}));
    }

    #[test]
    fn prune_nulls_keeps_non_null_values() {
        let mut doc = object(json!({"key1": "value1", "key2": 42}));
        prune_nulls(&mut doc);
        assert_eq!(Value::Object(doc), json!({"key1": "value1", "key2": 42}));
    }

    #[test]
    fn prune_nulls_recurses_into_nested_maps() {
        let mut doc = object(json!({
            "key1": "value1",
            "nested": {"inner1": "innerValue", "inner2": null}
        }));
        prune_nulls(&mut doc);
        assert_eq!(
            Value::Object(doc),
            json!({"key1": "value1", "nested": {"inner1": "innerValue"}})
        );
    }

    #[test]
    fn prune_nulls_drops_maps_that_become_empty() {
        let mut doc = object(json!({"key1": "value1", "nested": {"inner": null}}));
        prune_nulls(&mut doc);
        assert_eq!(Value::Object(doc), json!({"key1": "value1"}));
    }

    #[test]
    fn prune_nulls_handles_deep_nesting() {
        let mut doc = object(json!({
            "level1": {"level2": {"keep": "value", "remove": null}}
        }));
        prune_nulls(&mut doc);
        assert_eq!(
            Value::Object(doc),
            json!({"level1": {"level2": {"keep": "value"}}})
        );
    }

    #[test]
    fn deep_merge_empty_overlay_is_noop() {
        let mut base = object(json!({"key1": "value1"}));
        deep_merge(&mut base, Map::new());
        assert_eq!(Value::Object(base), json!({"key1": "value1"}));
    }

    #[test]
    fn deep_merge_overlay_wins_on_conflict() {
        let mut base = object(json!({"key1": "oldValue"}));
        deep_merge(&mut base, object(json!({"key1": "newValue"})));
        assert_eq!(Value::Object(base), json!({"key1": "newValue"}));
    }

    #[test]
    fn deep_merge_combines_disjoint_keys() {
        let mut base = object(json!({"key1": "value1"}));
        deep_merge(&mut base, object(json!({"key2": "value2"})));
        assert_eq!(Value::Object(base), json!({"key1": "value1", "key2": "value2"}));
    }

    #[test]
    fn deep_merge_recurses_into_nested_maps() {
        let mut base = object(json!({
            "nested": {"key1": "value1", "key2": "value2"}
        }));
        deep_merge(
            &mut base,
            object(json!({"nested": {"key2": "newValue2", "key3": "value3"}})),
        );
        assert_eq!(
            Value::Object(base),
            json!({"nested": {"key1": "value1", "key2": "newValue2", "key3": "value3"}})
        );
    }

    #[test]
    fn deep_merge_skips_null_overlay_values() {
        let mut base = object(json!({"key1": "value1"}));
        deep_merge(&mut base, object(json!({"key1": null})));
        assert_eq!(Value::Object(base), json!({"key1": "value1"}));
    }

    #[test]
    fn deep_merge_replaces_scalar_with_map() {
        let mut base = object(json!({"key1": "value1"}));
        deep_merge(&mut base, object(json!({"key1": {"nested": "value"}})));
        assert_eq!(Value::Object(base), json!({"key1": {"nested": "value"}}));
    }

    #[test]
    fn deep_merge_replaces_map_with_scalar() {
        let mut base = object(json!({"key1": {"nested": "value"}}));
        deep_merge(&mut base, object(json!({"key1": "flat"})));
        assert_eq!(Value::Object(base), json!({"key1": "flat"}));
    }

    #[test]
    fn render_yaml_produces_nested_document() {
        let doc = object(json!({
            "machineLearning": {"enabled": true, "urls": ["http://demo-machine-learning:3003"]}
        }));
        let rendered = render_yaml(&doc).unwrap();
        assert!(rendered.contains("machineLearning:"));
        assert!(rendered.contains("enabled: true"));
        assert!(rendered.contains("http://demo-machine-learning:3003"));
    }
}
