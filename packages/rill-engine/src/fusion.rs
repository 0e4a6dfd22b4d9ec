//! Construction-time fusion of output transformers.
//!
//! Smart constructors collapse adjacent map/translate layers so the machine
//! sees one transformer where user code stacked several. Terminals and
//! effect-only actions emit nothing, so transformers pass through them
//! unchanged.

use std::sync::Arc;

use crate::algebra::{BindFn, MapFn, Pull};
use crate::effect::Translation;

/// Elementwise output transform with fusion.
pub fn map_output(pull: Pull, f: MapFn) -> Pull {
    if pull.is_terminal() || pull.is_alg_effect() {
        return pull;
    }
    match pull {
        Pull::MapOutput { inner, f: g } => {
            let composed: MapFn = Arc::new(move |value| f(&g(value)?));
            Pull::MapOutput { inner, f: composed }
        }
        Pull::Translate { inner, translation } => Pull::Translate {
            inner: Box::new(map_output(*inner, f)),
            translation,
        },
        other => Pull::MapOutput {
            inner: Box::new(other),
            f,
        },
    }
}

/// Per-element substitution with pass-through for silent pulls.
pub fn flat_map_output(pull: Pull, f: BindFn) -> Pull {
    if pull.is_terminal() || pull.is_alg_effect() {
        return pull;
    }
    Pull::FlatMapOutput {
        inner: Box::new(pull),
        f,
    }
}

/// Effect translation with fusion.
pub fn translate(pull: Pull, translation: Translation) -> Pull {
    if translation.is_identity() || pull.is_terminal() {
        return pull;
    }
    match pull {
        // pure emission layers hold no effects to translate
        Pull::Output(chunk) => Pull::Output(chunk),
        Pull::MapOutput { inner, f } => Pull::MapOutput {
            inner: Box::new(translate(*inner, translation)),
            f,
        },
        Pull::Translate {
            inner,
            translation: existing,
        } => Pull::Translate {
            inner,
            translation: translation.compose(&existing),
        },
        other => Pull::Translate {
            inner: Box::new(other),
            translation,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::effect::{Gate, Thunk};
    use crate::error::StreamError;
    use crate::value::Value;

    fn double() -> MapFn {
        Arc::new(|v| Ok(Value::Int(v.as_int().unwrap_or(0) * 2)))
    }

    fn add_one() -> MapFn {
        Arc::new(|v| Ok(Value::Int(v.as_int().unwrap_or(0) + 1)))
    }

    #[test]
    fn test_map_output_passes_through_terminals_and_effects() {
        assert!(matches!(
            map_output(Pull::pure(1i64), double()),
            Pull::Done(Value::Int(1))
        ));
        assert!(matches!(
            map_output(Pull::eval(Thunk::of(1i64)), double()),
            Pull::Eval(_)
        ));
    }

    #[test]
    fn test_map_output_composes_with_map_output() {
        let base = Pull::output1(3i64).map_output(|v| Ok(Value::Int(v.as_int().unwrap_or(0) + 1)));
        let fused = map_output(base, double());
        match fused {
            Pull::MapOutput { inner, f } => {
                assert!(matches!(*inner, Pull::Output(_)));
                // inner transform applies first: (3 + 1) * 2
                assert_eq!(f(&Value::Int(3)), Ok(Value::Int(8)));
            }
            other => panic!("expected fused map-output, got {other:?}"),
        }
    }

    #[test]
    fn test_map_output_error_composes() {
        let failing: MapFn = Arc::new(|_| Err(StreamError::internal("bad map")));
        let base = map_output(Pull::output1(1i64), failing);
        let fused = map_output(base, double());
        match fused {
            Pull::MapOutput { f, .. } => {
                assert!(f(&Value::Int(1)).is_err());
            }
            other => panic!("expected map-output, got {other:?}"),
        }
    }

    #[test]
    fn test_map_output_pushes_under_translate() {
        let translated = translate(
            Pull::output1(1i64).then(Pull::eval(Thunk::of(2i64))),
            Translation::new(|t| t),
        );
        let fused = map_output(translated, add_one());
        match fused {
            Pull::Translate { inner, .. } => {
                assert!(matches!(*inner, Pull::MapOutput { .. }));
            }
            other => panic!("expected translate on the outside, got {other:?}"),
        }
    }

    #[test]
    fn test_flat_map_output_passes_through_silent_pulls() {
        let passed = flat_map_output(Pull::pure(1i64), Arc::new(|v| Pull::output1(v)));
        assert!(matches!(passed, Pull::Done(Value::Int(1))));

        let wrapped = flat_map_output(
            Pull::output(Chunk::from_vec(vec![Value::Int(1)])),
            Arc::new(|v| Pull::output1(v)),
        );
        assert!(matches!(wrapped, Pull::FlatMapOutput { .. }));
    }

    #[test]
    fn test_translate_fuses_nested_translations() {
        let inc = Translation::new(|thunk| {
            Thunk::new(move |gate| {
                thunk.run(gate).map(|v| match v {
                    Value::Int(i) => Value::Int(i + 1),
                    other => other,
                })
            })
        });
        let double_t = Translation::new(|thunk| {
            Thunk::new(move |gate| {
                thunk.run(gate).map(|v| match v {
                    Value::Int(i) => Value::Int(i * 2),
                    other => other,
                })
            })
        });

        let once = translate(Pull::eval(Thunk::of(1i64)), inc);
        let twice = translate(once, double_t);
        match twice {
            Pull::Translate {
                inner, translation, ..
            } => {
                assert!(matches!(*inner, Pull::Eval(_)));
                // existing (inner) translation applies first: (1 + 1) * 2
                let out = translation.apply(Thunk::of(1i64)).run(&Gate::open());
                assert_eq!(out, Ok(Value::Int(4)));
            }
            other => panic!("expected fused translate, got {other:?}"),
        }
    }

    #[test]
    fn test_translate_identity_is_free() {
        let pull = translate(Pull::eval(Thunk::of(1i64)), Translation::identity());
        assert!(matches!(pull, Pull::Eval(_)));
    }
}
