//! Unit tests for BufferPoolSpec validation and defaults

#[cfg(test)]
mod buffer_pool_spec_validation {
    use crate::crd::{
        BufferPoolSpec, ExtraVolume, ExtraVolumeSource, ImageSpec, SpecValidationError,
    };

    fn errors_for(spec: &BufferPoolSpec) -> Vec<SpecValidationError> {
        spec.validate().err().unwrap_or_default()
    }

    fn has_error(errors: &[SpecValidationError], field: &str) -> bool {
        errors.iter().any(|e| e.field == field)
    }

    fn extra(name: &str) -> ExtraVolume {
        ExtraVolume {
            volume_name: name.to_string(),
            path: "/extra".to_string(),
            container_name: "buffer-worker".to_string(),
            read_only: false,
            source: ExtraVolumeSource {
                empty_dir: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn default_spec_is_valid() {
        assert!(BufferPoolSpec::default().validate().is_ok());
    }

    #[test]
    fn negative_replicas_rejected() {
        let spec = BufferPoolSpec {
            replicas: -1,
            ..Default::default()
        };
        assert!(has_error(&errors_for(&spec), "spec.replicas"));
    }

    #[test]
    fn empty_worker_image_rejected() {
        let spec = BufferPoolSpec {
            image: ImageSpec::new("", "v1"),
            ..Default::default()
        };
        assert!(has_error(&errors_for(&spec), "spec.image.repository"));
    }

    #[test]
    fn claim_name_must_be_dns_label() {
        for bad in ["", "Buffer", "-buffer", "buffer-", "buf_fer"] {
            let mut spec = BufferPoolSpec::default();
            spec.buffer_storage.claim_name = bad.to_string();
            assert!(
                has_error(&errors_for(&spec), "spec.bufferStorage.claimName"),
                "claim name {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn drain_image_only_checked_when_enabled() {
        let mut spec = BufferPoolSpec::default();
        spec.scaling.drain.image = ImageSpec::new(" ", "v1");
        assert!(spec.validate().is_ok());

        spec.scaling.drain.enabled = true;
        assert!(has_error(
            &errors_for(&spec),
            "spec.scaling.drain.image.repository"
        ));
    }

    #[test]
    fn negative_backoff_limit_rejected() {
        let mut spec = BufferPoolSpec::default();
        spec.scaling.drain.enabled = true;
        spec.scaling.drain.backoff_limit = Some(-2);
        assert!(has_error(
            &errors_for(&spec),
            "spec.scaling.drain.backoffLimit"
        ));
    }

    #[test]
    fn duplicate_extra_volumes_rejected() {
        let spec = BufferPoolSpec {
            extra_volumes: vec![extra("scratch"), extra("scratch")],
            ..Default::default()
        };
        let errors = errors_for(&spec);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.extraVolumes[1].volumeName");
    }

    #[test]
    fn extra_volume_cannot_shadow_buffer_volume() {
        let spec = BufferPoolSpec {
            extra_volumes: vec![extra("buffer")],
            ..Default::default()
        };
        assert!(has_error(
            &errors_for(&spec),
            "spec.extraVolumes[0].volumeName"
        ));
    }

    #[test]
    fn all_errors_reported_together() {
        let mut spec = BufferPoolSpec {
            replicas: -3,
            image: ImageSpec::new("", ""),
            ..Default::default()
        };
        spec.buffer_storage.claim_name = String::new();
        assert_eq!(errors_for(&spec).len(), 3);
    }

    #[test]
    fn drain_disabled_when_pvc_disabled() {
        let mut spec = BufferPoolSpec::default();
        spec.scaling.drain.enabled = true;
        assert!(spec.drain_enabled());

        spec.disable_pvc = true;
        assert!(!spec.drain_enabled());
    }
}

#[cfg(test)]
mod defaults {
    use crate::crd::{BufferPoolSpec, ImageSpec};

    #[test]
    fn minimal_manifest_fills_defaults() {
        let spec: BufferPoolSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.buffer_storage.claim_name, "buffer");
        assert_eq!(spec.buffer_storage.size, "10Gi");
        assert!(!spec.scaling.drain.enabled);
        assert_eq!(
            spec.scaling.drain.pause_image.repository_with_tag(),
            "registry.k8s.io/pause:3.9"
        );
    }

    #[test]
    fn drain_section_parses_camel_case() {
        let spec: BufferPoolSpec = serde_json::from_value(serde_json::json!({
            "replicas": 3,
            "scaling": {
                "drain": {
                    "enabled": true,
                    "backoffLimit": 2,
                    "annotations": {"sidecar.istio.io/inject": "false"}
                }
            }
        }))
        .unwrap();
        assert_eq!(spec.replicas, 3);
        assert!(spec.scaling.drain.enabled);
        assert_eq!(spec.scaling.drain.backoff_limit, Some(2));
        assert_eq!(
            spec.scaling
                .drain
                .annotations
                .as_ref()
                .and_then(|a| a.get("sidecar.istio.io/inject"))
                .map(String::as_str),
            Some("false")
        );
    }

    #[test]
    fn image_without_tag_has_no_colon() {
        assert_eq!(ImageSpec::new("busybox", "").repository_with_tag(), "busybox");
        assert_eq!(
            ImageSpec::new("busybox", "1.36").repository_with_tag(),
            "busybox:1.36"
        );
    }
}
