//! 照片库存储构建模块
//!
//! 照片库 PVC 属于持久数据层：刻意不携带 owner reference，删除并重建
//! 同名 CR 时原样复用，保护用户照片数据。

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::Immich;
use crate::resources::labels;

const COMPONENT: &str = "library";

/// 照片库默认容量
const DEFAULT_SIZE: &str = "10Gi";

/// 构建照片库 PVC
///
/// PVC 创建后基本不可变，调用方只在不存在时创建，存在即复用。
pub fn claim(immich: &Immich) -> PersistentVolumeClaim {
    let persistence = immich.library_persistence();

    let size = persistence
        .size
        .unwrap_or_else(|| Quantity(DEFAULT_SIZE.to_string()));
    let access_modes = persistence
        .access_modes
        .filter(|modes| !modes.is_empty())
        .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]);

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(immich.library_pvc_name()),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: persistence.storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ImmichPersistence, ImmichSettings, ImmichSpec, PersistenceSpec};

    #[test]
    fn library_claim_has_no_owner_reference() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let pvc = claim(&immich);
        assert_eq!(pvc.metadata.name.as_deref(), Some("demo-library"));
        assert!(pvc.metadata.owner_references.is_none());
    }

    #[test]
    fn library_claim_defaults_to_ten_gigabytes_rwo() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let spec = claim(&immich).spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap().get("storage"),
            Some(&Quantity("10Gi".to_string()))
        );
        assert_eq!(spec.storage_class_name, None);
    }

    #[test]
    fn library_claim_honours_spec_overrides() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                immich: Some(ImmichSettings {
                    persistence: Some(ImmichPersistence {
                        library: Some(PersistenceSpec {
                            size: Some(Quantity("500Gi".to_string())),
                            storage_class: Some("fast-ssd".to_string()),
                            access_modes: Some(vec!["ReadWriteMany".to_string()]),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let spec = claim(&immich).spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast-ssd"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap().get("storage"),
            Some(&Quantity("500Gi".to_string()))
        );
    }
}
