//! Function metadata extraction
//!
//! Lifts the function definition from the parsed header into IR metadata.
//! The original (pre-normalization) type spec is preferred so user-defined
//! named types survive to code generation. Never fails: a template without a
//! header compiles with empty metadata.

use crate::error::CompileError;
use crate::ir::Parameter;
use crate::pipeline::{ProcessingContext, Stage};

pub struct MetadataExtractor;

impl Stage for MetadataExtractor {
    fn name(&self) -> &'static str {
        "MetadataExtractor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        let Some(def) = ctx.function_def.clone() else {
            return Ok(());
        };
        ctx.name = def.name.clone();
        ctx.function_name = def.function_name.clone();
        ctx.description = def.description.clone();

        for name in &def.parameter_order {
            let Some(original) = def.original_parameters.get(name) else {
                continue;
            };
            ctx.parameters.push(Parameter {
                name: name.clone(),
                param_type: original.type_name().to_string(),
                optional: original.optional(),
                description: original.description().map(str::to_string),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProcessingContext;

    #[test]
    fn test_metadata_from_header() {
        let src = "/*# function_name: findUsers\ndescription: look up users\nparameters:\n  id: int\n  dept:\n    type: Department[]\n    optional: true\n*/\nSELECT id FROM users";
        let mut ctx = ProcessingContext::for_tests(src);
        MetadataExtractor.run(&mut ctx).unwrap();
        assert_eq!(ctx.function_name, "findUsers");
        assert_eq!(ctx.description, "look up users");
        assert_eq!(ctx.parameters.len(), 2);
        // original spelling survives
        assert_eq!(ctx.parameters[1].param_type, "Department[]");
        assert!(ctx.parameters[1].optional);
        assert!(!ctx.parameters[0].optional);
    }

    #[test]
    fn test_absent_header_yields_empty_metadata() {
        let mut ctx = ProcessingContext::for_tests("SELECT 1");
        MetadataExtractor.run(&mut ctx).unwrap();
        assert!(ctx.function_name.is_empty());
        assert!(ctx.parameters.is_empty());
    }
}
