mod common;

use std::path::Path;
use std::sync::Arc;

use common::{write_tree, FakeToolchain};
use semdiff_core::model::{Symbol, SymbolKind};
use semdiff_core::source::kernel::{Resolution, Target};
use semdiff_core::source::{KernelTree, ResolveStep, SourceError, SourceTree, SymbolState, TreeKind};
use tempfile::{tempdir, TempDir};

const SYSCTL_C: &str = r#"static int panic_timeout;

int proc_dointvec(struct ctl_table *table, int write) {
	return 0;
}

static struct ctl_table kern_table[] = {
	{
		.procname	= "panic",
		.data		= &panic_timeout,
		.maxlen		= sizeof(int),
		.mode		= 0644,
		.proc_handler	= proc_dointvec,
	},
	{
		.procname	= "tainted",
		.maxlen		= sizeof(long),
		.mode		= 0644,
		.proc_handler	= proc_taint,
	},
	{
		.procname	= "weird",
		.data		= NULL,
		.proc_handler	= proc_dointvec,
	},
	{
		.procname	= "orphan",
		.data		= &panic_timeout,
		.proc_handler	= proc_missing,
	},
	{ }
};
"#;

const PANIC_C: &str = "int proc_taint(struct ctl_table *table, int write)\n{\n\treturn 1;\n}\n";

const PARAMS_C: &str = r#"static int part_max = 8;
module_param_named(max_part, part_max, int, 0444);

extern int shared_limit;
module_param_named(limit, shared_limit, int, 0444);
"#;

fn kernel(toolchain: Arc<FakeToolchain>) -> (TempDir, KernelTree) {
    let dir = tempdir().expect("tempdir");
    write_tree(
        dir.path(),
        &[
            ("kernel/sysctl.c", SYSCTL_C),
            ("kernel/panic.c", PANIC_C),
            ("drivers/demo/Makefile", "obj-m += demo.o\ndemo-objs := core.o \\\n\tparams.o\n"),
            ("drivers/demo/core.c", "int demo_init(void) { return 0; }\n"),
            ("drivers/demo/params.c", PARAMS_C),
            ("drivers/solo/solo.c", "static int level = 1;\nmodule_param(level, int, 0644);\n"),
        ],
    );
    let tree = KernelTree::open(dir.path(), None, toolchain, "x86").expect("open kernel");
    (dir, tree)
}

fn resolved(resolution: Resolution) -> Target {
    match resolution {
        Resolution::Resolved(target) => target,
        Resolution::Unresolved { step, reason } => panic!("unresolved at {step}: {reason}"),
    }
}

fn stopped_at(resolution: Resolution) -> ResolveStep {
    match resolution {
        Resolution::Resolved(target) => panic!("unexpectedly resolved to {target:?}"),
        Resolution::Unresolved { step, .. } => step,
    }
}

#[test]
fn sysctl_resolves_handler_and_data_variable() {
    let (dir, tree) = kernel(Arc::new(FakeToolchain::new()));

    let panic = resolved(tree.resolve_sysctl("kernel.panic"));
    assert_eq!(panic.function, "proc_dointvec");
    assert_eq!(panic.glob_var.as_deref(), Some("panic_timeout"));
    assert_eq!(panic.unit, dir.path().join("kernel/sysctl.c"));

    // No .data field: only the handler is compared, found in another unit.
    let tainted = resolved(tree.resolve_sysctl("kernel.tainted"));
    assert_eq!(tainted.function, "proc_taint");
    assert_eq!(tainted.glob_var, None);
    assert_eq!(tainted.unit, dir.path().join("kernel/panic.c"));
}

#[test]
fn sysctl_chain_reports_the_failing_step() {
    let (_dir, tree) = kernel(Arc::new(FakeToolchain::new()));

    assert_eq!(
        stopped_at(tree.resolve_sysctl("dev.raid.speed_limit_min")),
        ResolveStep::TableLookup
    );
    assert_eq!(stopped_at(tree.resolve_sysctl("net.core.somaxconn")), ResolveStep::TableLookup);
    assert_eq!(stopped_at(tree.resolve_sysctl("kernel.no_such_entry")), ResolveStep::EntryLookup);
    assert_eq!(stopped_at(tree.resolve_sysctl("kernel.weird")), ResolveStep::DataVariable);
    assert_eq!(stopped_at(tree.resolve_sysctl("kernel.orphan")), ResolveStep::Definition);
}

#[test]
fn module_params_follow_makefile_objects() {
    let (dir, tree) = kernel(Arc::new(FakeToolchain::new()));

    let target = resolved(tree.resolve_module_param("drivers/demo/demo", "max_part"));
    assert_eq!(target.function, "part_max");
    assert_eq!(target.glob_var.as_deref(), Some("part_max"));
    assert_eq!(target.unit, dir.path().join("drivers/demo/params.c"));

    let solo = resolved(tree.resolve_module_param("drivers/solo/solo", "level"));
    assert_eq!(solo.unit, dir.path().join("drivers/solo/solo.c"));
}

#[test]
fn module_param_chain_reports_the_failing_step() {
    let (_dir, tree) = kernel(Arc::new(FakeToolchain::new()));

    assert_eq!(
        stopped_at(tree.resolve_module_param("drivers/none/none", "x")),
        ResolveStep::ModuleSources
    );
    assert_eq!(
        stopped_at(tree.resolve_module_param("drivers/demo/demo", "nope")),
        ResolveStep::ParamDeclaration
    );
    assert_eq!(
        stopped_at(tree.resolve_module_param("drivers/demo/demo", "limit")),
        ResolveStep::Definition
    );
}

#[test]
fn resolved_symbols_build_with_kernel_flags() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (dir, tree) = kernel(toolchain.clone());

    let module = tree.resolve_and_build(&Symbol::sysctl("kernel.panic")).expect("sysctl builds");
    assert_eq!(module.function, "proc_dointvec");
    assert_eq!(module.glob_var.as_deref(), Some("panic_timeout"));
    assert_eq!(module.module.source.as_deref(), Some(dir.path().join("kernel/sysctl.c").as_path()));

    let handler = tree.resolve_and_build(&Symbol::function("proc_dointvec")).expect("function");
    assert!(Arc::ptr_eq(&module.module, &handler.module));
    assert_eq!(toolchain.invocations(), 1);

    let jobs = toolchain.jobs();
    assert_eq!(jobs[0].workdir, dir.path());
    assert!(jobs[0].flags.contains(&"-D__KERNEL__".to_string()));
    assert!(jobs[0].flags.contains(&"-Iarch/x86/include".to_string()));
    assert!(!jobs[0].flags.contains(&"-include".to_string()));
    assert_eq!(tree.kind(), TreeKind::KernelBuild);
}

#[test]
fn unresolved_symbols_are_cached_as_resolve_failures() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (_dir, tree) = kernel(toolchain.clone());

    let weird = Symbol::sysctl("kernel.weird");
    let err = tree.resolve_and_build(&weird).unwrap_err();
    assert_eq!(err.step(), Some(ResolveStep::DataVariable));
    assert_eq!(tree.state(&weird), SymbolState::ResolveFailed);

    let unhinted = Symbol { name: "level".into(), kind: SymbolKind::ModuleParam, hint: None };
    let err = tree.resolve_and_build(&unhinted).unwrap_err();
    assert!(matches!(err, SourceError::Resolve(ref e) if e.step == ResolveStep::ModuleSources));

    let missing = tree.resolve_and_build(&Symbol::function("absent")).unwrap_err();
    assert!(matches!(missing, SourceError::NotFound { .. }));
    assert_eq!(toolchain.invocations(), 0);
}

#[test]
fn kconfig_header_is_forced_when_present() {
    let toolchain = Arc::new(FakeToolchain::new());
    let dir = tempdir().expect("tempdir");
    write_tree(dir.path(), &[("include/linux/kconfig.h", "#define CONFIG_X 1\n")]);
    let tree = KernelTree::open(dir.path(), None, toolchain, "arm64").expect("open");
    let flags = tree.flags();
    let at = flags.iter().position(|f| f == "-include").expect("-include flag");
    assert_eq!(Path::new(&flags[at + 1]), Path::new("include/linux/kconfig.h"));
    assert!(flags.contains(&"-Iarch/arm64/include/generated".to_string()));
}
