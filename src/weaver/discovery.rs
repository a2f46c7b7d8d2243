//! Discovery of decorator kinds and weave targets.
//!
//! Decorator kinds form a closed set computed once per module: every concrete type
//! whose base chain reaches the configured marker base. Each kind's hooks are resolved
//! at that point, so the transformer only ever sees plain tokens and never inspects the
//! type hierarchy itself.

use crate::{
    metadata::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        index::DefinitionEntry,
        module::Module,
        runtime::names,
        signature::TypeLocator,
        token::Token,
    },
    weaver::{
        config::WeaverConfig,
        decorator::{DecoratorDescriptor, DecoratorKind, WeaveTarget},
        resolver::{MethodQuery, ReferenceResolver},
    },
    Result,
};

const OBJECT_ARRAY: &str = "System.Object[]";

fn hook_queries() -> [MethodQuery; 3] {
    [
        MethodQuery::named("OnEntry").with_param_types(&[names::METHOD_BASE, OBJECT_ARRAY]),
        MethodQuery::named("OnExit").with_param_types(&[
            names::OBJECT,
            names::METHOD_BASE,
            OBJECT_ARRAY,
        ]),
        MethodQuery::named("OnException").with_param_types(&[
            names::EXCEPTION,
            names::METHOD_BASE,
            OBJECT_ARRAY,
        ]),
    ]
}

fn reaches_marker(
    resolver: &ReferenceResolver<'_>,
    entry: &DefinitionEntry,
    config: &WeaverConfig,
    marker_definition: Option<Token>,
) -> bool {
    let definitions = resolver.definitions();
    if let Some(marker) = marker_definition {
        return entry.token != marker && definitions.derives_from(entry.token, marker);
    }

    match definitions.external_base(entry.token) {
        Some(TypeLocator::External(base)) => resolver
            .runtime()
            .derives_from(&base, &config.marker_base),
        _ => false,
    }
}

fn resolve_kind(resolver: &ReferenceResolver<'_>, entry: &DefinitionEntry) -> Result<DecoratorKind> {
    let host = TypeLocator::Definition(entry.token);
    let [on_entry, on_exit, on_exception] = hook_queries();
    Ok(DecoratorKind {
        attribute_type: entry.token,
        name: entry.full_name.clone(),
        on_entry: resolver.resolve_method(&host, &on_entry)?,
        on_exit: resolver.resolve_method(&host, &on_exit)?,
        on_exception: resolver.resolve_method(&host, &on_exception)?,
    })
}

/// Computes the decorator kinds of the module indexed by `resolver`.
///
/// Abstract types are never kinds. A concrete type deriving from the marker base whose
/// hooks cannot be resolved is reported as a warning and skipped.
pub fn decorator_kinds(
    resolver: &ReferenceResolver<'_>,
    config: &WeaverConfig,
    diagnostics: &Diagnostics,
) -> Vec<DecoratorKind> {
    let marker = &config.marker_base;
    let marker_definition = resolver
        .definitions()
        .find(&marker.full_name())
        .map(|entry| entry.token);
    if marker_definition.is_none() && !resolver.runtime().contains(marker) {
        diagnostics.info(
            DiagnosticCategory::Discovery,
            format!("Marker base {marker} is not available, nothing to weave"),
        );
        return Vec::new();
    }

    let mut kinds = Vec::new();
    for entry in resolver.definitions().iter() {
        if entry.is_abstract || !reaches_marker(resolver, entry, config, marker_definition) {
            continue;
        }

        match resolve_kind(resolver, entry) {
            Ok(kind) => kinds.push(kind),
            Err(error) => diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Discovery,
                    format!("Decorator {} is unusable: {error}", entry.full_name),
                )
                .with_token(entry.token),
            ),
        }
    }
    kinds
}

/// Finds every method to weave, in declaration order.
///
/// Types are visited parents first, methods in declaration order and attributes in
/// attribute order, producing one target per decorator attribute. Decorated methods
/// without a body are reported and skipped.
pub fn discover(
    module: &Module,
    resolver: &ReferenceResolver<'_>,
    config: &WeaverConfig,
    diagnostics: &Diagnostics,
) -> Vec<WeaveTarget> {
    let kinds = decorator_kinds(resolver, config, diagnostics);
    if kinds.is_empty() {
        return Vec::new();
    }

    let mut targets = Vec::new();
    for ty in module.all_types() {
        for method in &ty.methods {
            for attribute in &method.custom_attributes {
                let Some(kind) = kinds
                    .iter()
                    .find(|kind| kind.attribute_type == attribute.attribute_type)
                else {
                    continue;
                };

                if method.body.is_none() {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticSeverity::Warning,
                            DiagnosticCategory::Discovery,
                            format!(
                                "{} carries {} but has no body",
                                module
                                    .method_full_name(method.token)
                                    .unwrap_or_else(|| method.name.clone()),
                                kind.name
                            ),
                        )
                        .with_token(method.token),
                    );
                    continue;
                }

                targets.push(WeaveTarget {
                    declaring_type: ty.token,
                    method: method.token,
                    descriptor: DecoratorDescriptor {
                        kind: kind.clone(),
                        attribute: attribute.clone(),
                    },
                });
            }
        }
    }

    diagnostics.info(
        DiagnosticCategory::Discovery,
        format!(
            "Discovered {} decorator kinds and {} weave targets",
            kinds.len(),
            targets.len()
        ),
    );
    targets
}
