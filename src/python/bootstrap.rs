//! Bootstrap files written into Python XARs.
//!
//! The runtime executes `bootstrap_xar.sh` from the mount point. It points
//! `PYTHONPATH` and `LD_LIBRARY_PATH` at the mount and execs the interpreter
//! on `__run_xar_main__.py`, which runs the entry point.

/// Shell script the runtime executes.
pub const BOOTSTRAP_XAR: &str = "bootstrap_xar.sh";
/// Python stub invoking the entry point.
pub const RUN_XAR_MAIN: &str = "__run_xar_main__.py";

const BOOTSTRAP_XAR_TEMPLATE: &str = r#"#!/bin/sh -eu

readlink_e() {
    local path="$1"
    readlink -e "$path" 2>/dev/null && return

    # No readlink -e (BSD): resolve links by hand, then pwd -P
    path="${path%/}"

    if [[ "${path:0:1}" != "/" ]]
    then
        path="$(pwd -P)/$path"
    fi

    local slash_basename=""
    local counter=0
    while [[ -h "$path" ]]
    do
        if [[ counter -gt 200 ]]
        then
            echo "ERROR: Cyclical symbolic link detected: $path" 1>&2
            return
        fi
        counter=$(( counter + 1 ))

        target="$(readlink "$path")"
        if [[ "${target:0:1}" == "/" ]]
        then
            path="$target"
        else
            slash_basename="/$(basename "$path")"
            path="${path%$slash_basename}/$target"
        fi
    done

    slash_basename="/$(basename "$path")"
    if [[ "$slash_basename" == "/.." || "$slash_basename" == "/." ]]
    then
        slash_basename=""
    fi
    local parent_dir="${path%$slash_basename}"

    (cd "$parent_dir"; echo "$(pwd -P)$slash_basename")
}

BOOTSTRAP_PATH="$0"
ORIGINAL_EXECUTABLE="$1"; shift
DIR=$(dirname "$BOOTSTRAP_PATH")

# Child processes can restore the caller's search paths from these
if [ -n "${LD_LIBRARY_PATH+SET}" ]; then
  export XAR_SAVED_LD_LIBRARY_PATH=$LD_LIBRARY_PATH
fi

if [ -n "${PYTHONPATH+SET}" ]; then
  export XAR_SAVED_PYTHONPATH=$PYTHONPATH
fi

export XAR_INVOKED_NAME="$ORIGINAL_EXECUTABLE"
export LD_LIBRARY_PATH="$DIR"
export PYTHONPATH="$DIR"
export XAR_RUNTIME_FILES
XAR_RUNTIME_FILES="$(dirname "$(readlink_e "$BOOTSTRAP_PATH")")"
export XAR_PYTHON_COMMAND="{python}"

exec {python} "$DIR/{run_xar_main}" "$@"
"#;

const RUN_XAR_MAIN_PROLOGUE: &str = r#"
# Everything lives inside __invoke_main() so that nothing defined here
# leaks into the globals runpy hands to the user's main module.
def __invoke_main():
    import fcntl
    import os
    import sys

    sys.argv[0] = os.getenv("XAR_INVOKED_NAME")

    # Keep a descriptor open on the mount point so the XAR stays mounted
    # while it runs.
    xar_mountpoint = os.getenv('XAR_RUNTIME_FILES')
    if xar_mountpoint:
        fd = os.open(xar_mountpoint, os.O_RDONLY)
        flags = fcntl.fcntl(fd, fcntl.F_GETFD)
        fcntl.fcntl(fd, fcntl.F_SETFD, flags | fcntl.FD_CLOEXEC)
"#;

const RUN_FUNCTION: &str = r#"
    import {module}
    {module}.{function}()
"#;

const RUN_MODULE: &str = r#"
    import runpy
    module = "{module}"
    runpy._run_module_as_main(module, False)
"#;

const RUN_XAR_MAIN_EPILOGUE: &str = r#"

__invoke_main()
"#;

/// Render `bootstrap_xar.sh` for the interpreter command `python`.
pub fn bootstrap_script(python: &str) -> String {
    BOOTSTRAP_XAR_TEMPLATE
        .replace("{python}", python)
        .replace("{run_xar_main}", RUN_XAR_MAIN)
}

/// Render `__run_xar_main__.py`.
///
/// With a function the stub imports `module` and calls it; otherwise it
/// runs `module` as `__main__`.
pub fn run_xar_main(module: &str, function: Option<&str>) -> String {
    let body = match function {
        Some(function) => RUN_FUNCTION
            .replace("{module}", module)
            .replace("{function}", function),
        None => RUN_MODULE.replace("{module}", module),
    };
    format!("{}{}{}", RUN_XAR_MAIN_PROLOGUE, body, RUN_XAR_MAIN_EPILOGUE)
}
