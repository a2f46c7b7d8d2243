//! Module-level weaving.
//!
//! [`ModuleWeaver`] drives a whole run: it discovers the decorator kinds and targets of a
//! module, groups the targets per method and rewrites each method with every decorator
//! applied to it. Distinct methods are independent and are woven on the rayon thread pool
//! when [`WeaverConfig::parallel`] is set; the decorators of one method are always applied
//! in discovery order, each one wrapping the result of the previous.
//!
//! A method that fails is left exactly as it was. Its error is recorded in the
//! [`WeaveReport`] and as an error diagnostic, and the run continues with the others.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{
    metadata::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        index::DefinitionIndex,
        method::MethodDef,
        module::{Module, TypeDef},
        token::Token,
    },
    weaver::{
        config::WeaverConfig,
        decorator::DecoratorDescriptor,
        discovery::discover,
        resolver::ReferenceResolver,
        transform::MethodDecorator,
    },
    Error, Result,
};

/// Outcome of weaving one module.
#[derive(Debug, Default)]
pub struct WeaveReport {
    /// Methods woven successfully, in discovery order
    pub woven: Vec<Token>,
    /// Methods left untouched because weaving them failed
    pub failed: Vec<(Token, Error)>,
    /// Everything reported during the run
    pub diagnostics: Diagnostics,
}

impl WeaveReport {
    /// True if no method failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Error a method failed with, if it did
    #[must_use]
    pub fn failure(&self, method: Token) -> Option<&Error> {
        self.failed
            .iter()
            .find(|(token, _)| *token == method)
            .map(|(_, error)| error)
    }
}

// The decorators applied to one method
struct MethodGroup {
    method: Token,
    declaring_type: Token,
    descriptors: Vec<DecoratorDescriptor>,
}

/// Weaves every decorated method of a module.
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::prelude::*;
///
/// # fn example(module: &mut Module) {
/// let report = ModuleWeaver::new(WeaverConfig::default()).execute(module);
/// for (method, error) in &report.failed {
///     eprintln!("{method}: {error}");
/// }
/// println!("{}", report.diagnostics.summary());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModuleWeaver {
    config: WeaverConfig,
}

impl ModuleWeaver {
    /// Creates a weaver with the given configuration
    #[must_use]
    pub fn new(config: WeaverConfig) -> Self {
        ModuleWeaver { config }
    }

    /// The configuration of this weaver
    #[must_use]
    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Weaves `module` in place.
    ///
    /// Never fails as a whole: per-method failures are collected in the report and the
    /// failing methods keep their original bodies. References interned while weaving
    /// (including those of failed methods) stay in the module's reference tables.
    pub fn execute(&self, module: &mut Module) -> WeaveReport {
        let diagnostics = if self.config.report_info {
            Diagnostics::new()
        } else {
            Diagnostics::without_info()
        };

        let definitions = DefinitionIndex::build(module);
        let targets = {
            let resolver =
                ReferenceResolver::new(&module.runtime, &module.imports, definitions.clone());
            discover(module, &resolver, &self.config, &diagnostics)
        };
        if targets.is_empty() {
            diagnostics.info(DiagnosticCategory::General, "No decorated methods to weave");
            return WeaveReport {
                diagnostics,
                ..WeaveReport::default()
            };
        }

        let mut groups: Vec<MethodGroup> = Vec::new();
        let mut positions: HashMap<Token, usize> = HashMap::new();
        for target in targets {
            let position = *positions.entry(target.method).or_insert_with(|| {
                groups.push(MethodGroup {
                    method: target.method,
                    declaring_type: target.declaring_type,
                    descriptors: Vec::new(),
                });
                groups.len() - 1
            });
            groups[position].descriptors.push(target.descriptor);
        }

        let (types, imports, runtime) = module.split_for_weaving();
        let resolver = ReferenceResolver::new(runtime, imports, definitions);
        let decorator = MethodDecorator::new(&resolver, &diagnostics, &self.config);

        let mut methods = HashMap::new();
        collect_methods(types, &mut methods);
        let jobs: Vec<(&mut MethodDef, &MethodGroup)> = groups
            .iter()
            .filter_map(|group| methods.remove(&group.method).map(|method| (method, group)))
            .collect();

        let weave_one = |(method, group): (&mut MethodDef, &MethodGroup)| {
            (group.method, weave_group(&decorator, method, group))
        };
        let results: Vec<(Token, Result<()>)> = if self.config.parallel {
            jobs.into_par_iter().map(weave_one).collect()
        } else {
            jobs.into_iter().map(weave_one).collect()
        };

        let mut report = WeaveReport::default();
        for (method, result) in results {
            match result {
                Ok(()) => report.woven.push(method),
                Err(error) => {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticSeverity::Error,
                            DiagnosticCategory::Transform,
                            error.to_string(),
                        )
                        .with_token(method),
                    );
                    report.failed.push((method, error));
                }
            }
        }

        diagnostics.info(
            DiagnosticCategory::General,
            format!(
                "Woven {} methods, {} failed",
                report.woven.len(),
                report.failed.len()
            ),
        );
        report.diagnostics = diagnostics;
        report
    }
}

// Applies every decorator of `group` to a copy of `method`, committing only if all succeed
fn weave_group(
    decorator: &MethodDecorator<'_, '_>,
    method: &mut MethodDef,
    group: &MethodGroup,
) -> Result<()> {
    let mut working = method.clone();
    for descriptor in &group.descriptors {
        decorator.decorate(&mut working, descriptor, group.declaring_type)?;
    }
    *method = working;
    Ok(())
}

fn collect_methods<'t>(types: &'t mut [TypeDef], out: &mut HashMap<Token, &'t mut MethodDef>) {
    for ty in types {
        for method in &mut ty.methods {
            out.insert(method.token, method);
        }
        collect_methods(&mut ty.nested, out);
    }
}
