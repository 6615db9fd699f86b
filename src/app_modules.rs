//! Virtual modules made available to every view.
//!
//! - `$app/env`: environment flags, generated per target and environment
//! - `$app/global`: accessors for the context set by the wrapper component

use std::collections::BTreeMap;

pub const APP_ENV_MODULE_ID: &str = "$app/env";
pub const APP_GLOBAL_MODULE_ID: &str = "$app/global";

/// Context keys shared by the wrapper component and `$app/global`.
pub const CONTEXT_GLOBAL_PROPS: &str = "global.props";
pub const CONTEXT_GLOBAL_STORE: &str = "global.store";
pub const CONTEXT_GLOBAL_ASSETS: &str = "global.assets";
pub const CONTEXT_GLOBAL_ALLY: &str = "global.ally";

/// Generate the `$app/env` module for a target and environment.
pub fn app_env_module(env: &str, browser: bool) -> String {
    format!(
        r#"export const browser = {browser};
export const server = {server};
export const env = "{env}";
export const development = {development};
export const testing = {testing};
export const stage = {stage};
export const production = {production};
"#,
        browser = browser,
        server = !browser,
        env = crate::utils::escape_js_string(env),
        development = env == "development",
        testing = env == "testing",
        stage = env == "stage",
        production = env == "production",
    )
}

/// Source of the `$app/global` module.
pub fn app_global_module() -> String {
    format!(
        r#"import {{ getContext }} from 'svelte';

export const ContextKey = {{
    GLOBAL_PROPS: '{props}',
    GLOBAL_STORE: '{store}',
    GLOBAL_ASSETS: '{assets}',
    GLOBAL_ALLY: '{ally}'
}};

function getPath(target, key, fallback) {{
    let current = target;
    for (const part of String(key).split('.')) {{
        if (current == null || !(part in Object(current))) {{
            return fallback;
        }}
        current = current[part];
    }}
    return current;
}}

function setPath(target, key, value) {{
    const parts = String(key).split('.');
    let current = target;
    for (const part of parts.slice(0, -1)) {{
        if (current[part] == null || typeof current[part] !== 'object') {{
            current[part] = {{}};
        }}
        current = current[part];
    }}
    current[parts[parts.length - 1]] = value;
}}

export function getStores() {{
    return getContext(ContextKey.GLOBAL_STORE);
}}

export function getStore(key) {{
    return getPath(getStores(), key, null);
}}

export function setStore(key, value) {{
    setPath(getStores(), key, value);
}}

export function getProps() {{
    return getContext(ContextKey.GLOBAL_PROPS);
}}

export function getProp(key) {{
    return getPath(getProps(), key, null);
}}

export function setProp(key, value) {{
    setPath(getProps(), key, value);
}}

export function getAssets() {{
    return getContext(ContextKey.GLOBAL_ASSETS);
}}

export function nextId(prefix = null) {{
    const ally = getContext(ContextKey.GLOBAL_ALLY);
    const key = prefix != null ? `prefix.${{prefix}}` : 'counter';
    const counter = (getPath(ally, key, 0) || 0) + 1;
    setPath(ally, key, counter);
    return counter;
}}
"#,
        props = CONTEXT_GLOBAL_PROPS,
        store = CONTEXT_GLOBAL_STORE,
        assets = CONTEXT_GLOBAL_ASSETS,
        ally = CONTEXT_GLOBAL_ALLY,
    )
}

/// Both virtual modules, keyed by module id.
pub fn virtual_modules(env: &str, browser: bool) -> BTreeMap<String, String> {
    let mut modules = BTreeMap::new();
    modules.insert(APP_ENV_MODULE_ID.to_string(), app_env_module(env, browser));
    modules.insert(APP_GLOBAL_MODULE_ID.to_string(), app_global_module());
    modules
}
