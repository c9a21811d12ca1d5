//! 规约校验模块
//!
//! 在任何对象变更之前运行。所有缺失镜像与缺失的外部端点配置一次性
//! 聚合上报，让用户一轮修复全部问题，而不是逐条试错。

use crate::crd::{
    Immich, OperatorImages, ENV_RELATED_IMAGE_MACHINE_LEARNING, ENV_RELATED_IMAGE_POSTGRES,
    ENV_RELATED_IMAGE_SERVER, ENV_RELATED_IMAGE_VALKEY,
};
use crate::error::Error;

/// 校验启用组件的镜像与外部端点配置
pub fn validate(immich: &Immich, images: &OperatorImages) -> Result<(), Error> {
    let mut problems: Vec<String> = Vec::new();

    if immich.is_server_enabled() && immich.get_server_image(images).is_none() {
        problems.push(format!(
            "missing server image (set spec.server.image or {ENV_RELATED_IMAGE_SERVER})"
        ));
    }
    if immich.is_machine_learning_enabled() && immich.get_machine_learning_image(images).is_none()
    {
        problems.push(format!(
            "missing machine-learning image (set spec.machineLearning.image or {ENV_RELATED_IMAGE_MACHINE_LEARNING})"
        ));
    }
    if immich.is_valkey_enabled() && immich.get_valkey_image(images).is_none() {
        problems.push(format!(
            "missing valkey image (set spec.valkey.image or {ENV_RELATED_IMAGE_VALKEY})"
        ));
    }
    if immich.is_postgres_enabled() && immich.get_postgres_image(images).is_none() {
        problems.push(format!(
            "missing postgres image (set spec.postgres.image or {ENV_RELATED_IMAGE_POSTGRES})"
        ));
    }

    // 内置数据库关闭时必须给出外部连接信息
    if !immich.is_postgres_enabled() {
        let postgres = immich.spec.postgres.as_ref();
        if postgres
            .and_then(|p| p.host.as_deref())
            .map_or(true, str::is_empty)
        {
            problems
                .push("spec.postgres.host is required when spec.postgres.enabled=false".to_string());
        }
        if postgres.map_or(true, |p| {
            p.password_secret_ref.is_none() && p.url_secret_ref.is_none()
        }) {
            problems.push(
                "spec.postgres.passwordSecretRef or spec.postgres.urlSecretRef is required when spec.postgres.enabled=false"
                    .to_string(),
            );
        }
    }

    // 内置缓存关闭时必须给出外部地址
    if !immich.is_valkey_enabled() {
        if immich
            .spec
            .valkey
            .as_ref()
            .and_then(|v| v.host.as_deref())
            .map_or(true, str::is_empty)
        {
            problems
                .push("spec.valkey.host is required when spec.valkey.enabled=false".to_string());
        }
    }

    // 机器学习是可选能力：内置关闭且未配置外部 URL 是合法状态，
    // 此时智能搜索等 ML 功能整体不可用

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ImmichSpec, MachineLearningSpec, PostgresSpec, SecretKeySelector, ValkeySpec,
    };

    fn images() -> OperatorImages {
        OperatorImages {
            server: Some("ghcr.io/immich-app/immich-server:latest".to_string()),
            machine_learning: Some(
                "ghcr.io/immich-app/immich-machine-learning:latest".to_string(),
            ),
            valkey: Some("docker.io/valkey/valkey:9-alpine".to_string()),
            postgres: Some("docker.io/tensorchord/pgvecto-rs:pg17-v0.4.0".to_string()),
            init_container: None,
        }
    }

    #[test]
    fn defaults_with_injected_images_are_valid() {
        let immich = Immich::new("demo", ImmichSpec::default());
        assert!(validate(&immich, &images()).is_ok());
    }

    #[test]
    fn external_postgres_without_host_is_rejected() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                postgres: Some(PostgresSpec {
                    enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let message = validate(&immich, &images()).unwrap_err().to_string();
        assert!(message.contains("spec.postgres.host is required"));
        assert!(message.contains("passwordSecretRef"));
    }

    #[test]
    fn external_postgres_with_full_config_is_valid() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                postgres: Some(PostgresSpec {
                    enabled: Some(false),
                    host: Some("db.example.com".to_string()),
                    password_secret_ref: Some(SecretKeySelector {
                        name: "db-auth".to_string(),
                        key: "password".to_string(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert!(validate(&immich, &images()).is_ok());
    }

    #[test]
    fn external_valkey_without_host_is_rejected() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                valkey: Some(ValkeySpec {
                    enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let message = validate(&immich, &images()).unwrap_err().to_string();
        assert!(message.contains("spec.valkey.host is required"));
    }

    #[test]
    fn disabled_machine_learning_without_url_is_valid() {
        // 与外部数据库/缓存不同：ML 缺省 URL 不算错误，功能整体关闭
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                machine_learning: Some(MachineLearningSpec {
                    enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert!(validate(&immich, &images()).is_ok());
    }

    #[test]
    fn every_problem_is_reported_in_one_error() {
        // 同时缺少服务端镜像与外部数据库地址：两个问题必须同时出现
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                postgres: Some(PostgresSpec {
                    enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let no_images = OperatorImages::default();
        let message = validate(&immich, &no_images).unwrap_err().to_string();
        assert!(message.contains("missing server image"));
        assert!(message.contains("spec.postgres.host is required"));
        assert!(message.contains("missing machine-learning image"));
        assert!(message.contains("missing valkey image"));
    }
}
