use crate::class_identity::ClassIdentityTransform;
use crate::control_flow::{ControlFlowTransform, FlowLevel};
use crate::member_name::MemberNameTransform;
use crate::method_identity::MethodIdentityTransform;
use crate::method_order::MethodOrderTransform;
use crate::obfuscator::ObfuscationConfig;
use crate::string_encoding::StringEncodingTransform;
use crate::Transform;

/// Builds the ordered stage list for a configuration.
#[derive(Debug, Clone, Copy)]
pub struct TransformChainBuilder<'c> {
    config: &'c ObfuscationConfig,
    flow: FlowLevel,
}

impl<'c> TransformChainBuilder<'c> {
    /// Stages for `config`, with its own flow level.
    pub const fn new(config: &'c ObfuscationConfig) -> Self {
        Self {
            config,
            flow: config.flow_obfuscation,
        }
    }

    /// Overrides the configured flow level, e.g. to retry a class without flow.
    pub const fn with_flow(mut self, flow: FlowLevel) -> Self {
        self.flow = flow;
        self
    }

    /// Builds the enabled stages in their fixed order.
    pub fn build(&self) -> Vec<Box<dyn Transform>> {
        let config = self.config;
        let mut chain: Vec<Box<dyn Transform>> = Vec::new();
        if config.obfuscate_class_names || config.obfuscate_packages {
            chain.push(Box::new(ClassIdentityTransform::new(
                config.obfuscate_packages,
                config.obfuscate_class_names,
            )));
        }
        if config.obfuscate_variables {
            chain.push(Box::new(MemberNameTransform::new()));
        }
        if config.obfuscate_strings {
            chain.push(Box::new(StringEncodingTransform::new()));
        }
        if config.obfuscate_method_names {
            chain.push(Box::new(MethodIdentityTransform::new()));
        }
        if self.flow != FlowLevel::None {
            chain.push(Box::new(ControlFlowTransform::new(self.flow)));
        }
        if config.change_methods_orders {
            chain.push(Box::new(MethodOrderTransform::new()));
        }
        chain
    }
}
