//! Name-keyed constructors so a textual config can instantiate necks and heads.
//!
//! Each constructor receives the `type:`-less argument mapping of its
//! [`ModuleSpec`] and the target device.

use std::collections::BTreeMap;

use burn::prelude::*;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::config::{AsfpConfig, ModuleSpec, SepcHeadConfig};
use crate::error::{AsfpError, Result};
use crate::model::{Asfp, SepcRetinaHead};

pub type NeckBuilder<B> = fn(&Mapping, &<B as Backend>::Device) -> Result<Asfp<B>>;
pub type HeadBuilder<B> = fn(&Mapping, &<B as Backend>::Device) -> Result<SepcRetinaHead<B>>;

pub struct Registry<T> {
    kind: &'static str,
    entries: BTreeMap<&'static str, T>,
}

impl<T: Copy> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, builder: T) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(AsfpError::DuplicateModule {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        self.entries.insert(name, builder);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<T> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| AsfpError::UnknownModule {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

/// Deserializes constructor arguments. Any malformed argument, such as an
/// unknown `refine_type`, is reported as an invalid configuration.
pub fn parse_args<C: DeserializeOwned>(name: &str, args: &Mapping) -> Result<C> {
    serde_yaml::from_value(Value::Mapping(args.clone()))
        .map_err(|e| AsfpError::invalid(format!("{name}: {e}")))
}

fn build_asfp<B: Backend>(args: &Mapping, device: &B::Device) -> Result<Asfp<B>> {
    let config: AsfpConfig = parse_args("ASFP", args)?;
    Asfp::new(device, &config)
}

fn build_sepc_retina_head<B: Backend>(
    args: &Mapping,
    device: &B::Device,
) -> Result<SepcRetinaHead<B>> {
    let config: SepcHeadConfig = parse_args("SEPCRetinaHead", args)?;
    SepcRetinaHead::new(device, &config)
}

pub fn necks<B: Backend>() -> Result<Registry<NeckBuilder<B>>> {
    let mut registry = Registry::new("neck");
    registry.register("ASFP", build_asfp::<B> as NeckBuilder<B>)?;
    Ok(registry)
}

pub fn heads<B: Backend>() -> Result<Registry<HeadBuilder<B>>> {
    let mut registry = Registry::new("head");
    registry.register(
        "SEPCRetinaHead",
        build_sepc_retina_head::<B> as HeadBuilder<B>,
    )?;
    Ok(registry)
}

pub fn build_neck<B: Backend>(spec: &ModuleSpec, device: &B::Device) -> Result<Asfp<B>> {
    let builder = necks::<B>()?.get(&spec.kind)?;
    builder(&spec.args, device)
}

pub fn build_head<B: Backend>(spec: &ModuleSpec, device: &B::Device) -> Result<SepcRetinaHead<B>> {
    let builder = heads::<B>()?.get(&spec.kind)?;
    builder(&spec.args, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefineType;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_registered_names() {
        assert_eq!(necks::<TestBackend>().unwrap().names(), vec!["ASFP"]);
        assert_eq!(
            heads::<TestBackend>().unwrap().names(),
            vec!["SEPCRetinaHead"]
        );
    }

    #[test]
    fn test_build_neck_from_spec() {
        let device = Default::default();
        let spec = ModuleSpec::new("ASFP")
            .with_arg("in_channels", 8)
            .with_arg("num_levels", 3)
            .with_arg("refine_level", 1)
            .with_arg("refine_type", "conv");

        let neck = build_neck::<TestBackend>(&spec, &device).unwrap();
        assert_eq!(neck.num_levels(), 3);
        assert_eq!(neck.refine_type(), RefineType::Conv);
    }

    #[test]
    fn test_invalid_refine_type_is_invalid_configuration() {
        let device = Default::default();
        let spec = ModuleSpec::new("ASFP")
            .with_arg("in_channels", 8)
            .with_arg("num_levels", 3)
            .with_arg("refine_type", "invalid");

        assert!(matches!(
            build_neck::<TestBackend>(&spec, &device),
            Err(AsfpError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_shipped_configs_parse() {
        let sources = [
            include_str!("../configs/retinanet_asfp.yaml"),
            include_str!("../configs/retinanet_asfp_gn.yaml"),
        ];
        for source in sources {
            let config: crate::config::DetectorConfig = serde_yaml::from_str(source).unwrap();
            assert_eq!(config.neck.kind, "ASFP");
            assert_eq!(config.head.kind, "SEPCRetinaHead");

            let neck: AsfpConfig = parse_args("ASFP", &config.neck.args).unwrap();
            neck.validate().unwrap();
            assert_eq!(neck.num_levels, config.strides.len());

            let head: SepcHeadConfig = parse_args("SEPCRetinaHead", &config.head.args).unwrap();
            head.validate().unwrap();
            assert_eq!(head.in_channels, neck.in_channels);
        }
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        let device = Default::default();
        let spec = ModuleSpec::new("BFP").with_arg("in_channels", 8);
        assert!(matches!(
            build_neck::<TestBackend>(&spec, &device),
            Err(AsfpError::UnknownModule { .. })
        ));

        let mut registry = necks::<TestBackend>().unwrap();
        let builder = registry.get("ASFP").unwrap();
        assert!(matches!(
            registry.register("ASFP", builder),
            Err(AsfpError::DuplicateModule { .. })
        ));
    }
}
