//! Python source sent to the target application's embedded interpreter.
//!
//! The rendered text is an opaque payload for the relay. Bump
//! [`TEMPLATE_VERSION`] whenever the contract with the host-side command
//! server or the remote debugger changes.

use std::path::Path;

pub const TEMPLATE_VERSION: u32 = 1;

/// Namespace kept in `__main__` so consecutive injections share globals.
pub const HOST_NAMESPACE: &str = "_atom_plugin_SendToNuke";

/// Inputs of the code that starts the remote debugger inside the host.
#[derive(Debug, Clone)]
pub struct AttachCode<'a> {
    pub library_path: &'a Path,
    pub interpreter: &'a str,
    pub host: &'a str,
    pub port: u16,
}

impl AttachCode<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"
import sys
import os
debugpy_module = r"{library_path}"
if debugpy_module not in sys.path:
    sys.path.insert(0, debugpy_module)

import debugpy

try:
    debugpy.configure(python=r"{interpreter}")
    debugpy.listen((r"{host}",{port}))
except RuntimeError:
    x=1
finally:
    sys.stderr.write("\n\nConnection to the debugger is active.\n\n")
"#,
            library_path = self.library_path.display(),
            interpreter = self.interpreter,
            host = self.host,
            port = self.port,
        )
    }
}

/// Inputs of the code that imports (or reloads) the user's module once the
/// remote debugger is configured.
#[derive(Debug, Clone)]
pub struct RunCode<'a> {
    pub working_dir: &'a str,
    pub module: &'a str,
}

impl RunCode<'_> {
    pub fn render(&self) -> String {
        // stdout is not shown by the host console, everything goes to stderr.
        format!(
            r#"
try:
    s = sys.stdout
    sys.stdout = sys.stderr

    current_directory = r"{working_dir}"
    if current_directory not in sys.path:
        sys.path.insert(0, current_directory)

    print('\nDebugging {module}...\n\n')

    if '{module}' not in globals().keys():
        import {module}
    else:
        reload({module})

    print('\n\nDone.\n')

    sys.stdout = s

except Exception as e:
    sys.stderr.write('Error while debugging: ' + str(e))
    raise e
"#,
            working_dir = self.working_dir,
            module = self.module,
        )
    }
}

/// Wrapper written to the command socket: executes `script` inside the
/// persistent host namespace.
pub fn host_command(script: &Path) -> String {
    format!(
        r#"
import traceback
import sys
import __main__

namespace = __main__.__dict__.get('{namespace}')
if not namespace:
    namespace = __main__.__dict__.copy()
    __main__.__dict__['{namespace}'] = namespace

namespace['__file__'] = r"{script}"
namespace['print'] = sys.stderr.write

try:
    execfile(r"{script}", namespace, namespace)
except:
    sys.stdout.write(traceback.format_exc())
    traceback.print_exc()
"#,
        namespace = HOST_NAMESPACE,
        script = script.display(),
    )
}
