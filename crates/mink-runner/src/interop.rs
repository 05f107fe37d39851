//! Namespace interop for externally loaded modules

use mink_mocker::{JsObject, LiveBinding, Property, PropertyKey, Value};

/// Copy every enumerable key of `source` except `default` onto `exports` as
/// live bindings, leaving keys `exports` already has untouched.
///
/// Primitives and arrays contribute nothing.
pub fn export_all(exports: &JsObject, source: &Value) {
    let Some(holder) = source.property_holder() else {
        return;
    };
    if holder.ptr_eq(exports) {
        return;
    }
    for key in holder.keys() {
        if key == "default" || exports.has(&PropertyKey::from(key.as_str())) {
            continue;
        }
        exports.define(
            key.as_str(),
            Property::Live(LiveBinding::new(holder.clone(), key.as_str())),
            true,
        );
    }
}

/// Wrap a loaded module value as a namespace without interop
pub fn as_namespace(module: Value) -> JsObject {
    match module {
        Value::Object(obj) => obj,
        other => {
            let ns = JsObject::module_namespace();
            ns.set("default", other);
            ns
        }
    }
}

/// Whether default interop applies to `module` loaded from `path`
pub fn should_interop(path: &str, module: &Value, interop_default: bool) -> bool {
    interop_default && !path.ends_with(".mjs") && has_key(module, "default")
}

/// Namespace for an external module.
///
/// `default` is the module's default export, unwrapped once more when it is
/// itself an `__esModule` object. Named keys of the module, then of the
/// default export, are exposed as live bindings.
pub fn interop_namespace(module: &Value) -> JsObject {
    let (module, default) = unwrap_default(module);

    let ns = JsObject::module_namespace();
    ns.set("default", default.clone());
    for source in [&module, &default] {
        let Some(holder) = source.property_holder() else {
            continue;
        };
        for key in holder.keys() {
            if ns.has_own(&PropertyKey::from(key.as_str())) {
                continue;
            }
            ns.define(
                key.as_str(),
                Property::Live(LiveBinding::new(holder.clone(), key.as_str())),
                true,
            );
        }
    }
    ns
}

/// Interop'd namespace, or the module as-is when interop does not apply
pub fn interop_module(path: &str, module: Value, interop_default: bool) -> JsObject {
    if should_interop(path, &module, interop_default) {
        interop_namespace(&module)
    } else {
        as_namespace(module)
    }
}

fn unwrap_default(module: &Value) -> (Value, Value) {
    if module.is_primitive() {
        return (Value::Undefined, module.clone());
    }
    let mut module = module.clone();
    let mut default = if has_key(&module, "default") {
        module.get("default")
    } else {
        module.clone()
    };
    if has_key(&default, "__esModule") {
        module = default.clone();
        if has_key(&default, "default") {
            default = default.get("default");
        }
    }
    (module, default)
}

fn has_key(value: &Value, key: &str) -> bool {
    value
        .property_holder()
        .is_some_and(|holder| holder.has(&PropertyKey::from(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mink_mocker::JsFunction;

    #[test]
    fn test_export_all_skips_default_and_existing() {
        let exports = JsObject::module_namespace();
        exports.set("a", Value::from(0));
        let source = JsObject::from_entries([("a", 1), ("b", 2), ("default", 3)]);

        export_all(&exports, &Value::Object(source.clone()));
        assert_eq!(exports.get(&"a".into()), Value::from(0));
        assert_eq!(exports.get(&"b".into()), Value::from(2));
        assert!(!exports.has_own(&"default".into()));

        source.set("b", Value::from(20));
        assert_eq!(exports.get(&"b".into()), Value::from(20));
    }

    #[test]
    fn test_export_all_ignores_primitives_and_self() {
        let exports = JsObject::module_namespace();
        export_all(&exports, &Value::from(1));
        export_all(&exports, &Value::Object(exports.clone()));
        assert!(exports.keys().is_empty());
    }

    #[test]
    fn test_commonjs_interop() {
        let add = JsFunction::native("add", |_, _| Ok(Value::from(3)));
        let cjs = JsObject::from_entries([("add", Value::from(add.clone()))]);
        let module = Value::Object(JsObject::from_entries([("default", Value::Object(cjs.clone()))]));

        let ns = interop_module("/node_modules/calc/index.js", module, true);
        assert!(ns.get(&"default".into()).same_value(&Value::Object(cjs)));
        assert!(ns.get(&"add".into()).same_value(&Value::from(add)));
        assert!(ns.is_module());
    }

    #[test]
    fn test_es_module_default_unwrapped() {
        let inner = JsObject::from_entries([
            ("__esModule", Value::from(true)),
            ("default", Value::from("main")),
            ("helper", Value::from(1)),
        ]);
        let module = Value::Object(JsObject::from_entries([("default", Value::Object(inner))]));

        let ns = interop_module("/lib.cjs", module, true);
        assert_eq!(ns.get(&"default".into()), Value::from("main"));
        assert_eq!(ns.get(&"helper".into()), Value::from(1));
    }

    #[test]
    fn test_interop_skipped() {
        let module = JsObject::from_entries([("default", 1), ("x", 2)]);
        let ns = interop_module("/lib.mjs", Value::Object(module.clone()), true);
        assert!(ns.ptr_eq(&module));

        let ns = interop_module("/lib.js", Value::Object(module.clone()), false);
        assert!(ns.ptr_eq(&module));

        let ns = interop_module("/lib.js", Value::from("text"), true);
        assert_eq!(ns.get(&"default".into()), Value::from("text"));
    }
}
