use super::{CaseEnv, TestCase};
use crate::context::HsaContext;
use crate::error::Status;
use crate::session::Session;
use crate::types::{ExecutableHandle, ExecutableState, Profile, SymbolKind};
use crate::{Executable, HsaError, Memory, Result, assert_status};

const SUITE: &str = "executable";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "create_not_initialized", create_not_initialized),
    TestCase::new(SUITE, "create_destroy", create_destroy),
    TestCase::new(SUITE, "destroy_invalid", destroy_invalid),
    TestCase::new(SUITE, "double_freeze", double_freeze),
    TestCase::new(SUITE, "define_after_freeze", define_after_freeze),
    TestCase::new(SUITE, "duplicate_definition", duplicate_definition),
    TestCase::new(SUITE, "missing_symbol", missing_symbol),
    TestCase::new(SUITE, "symbol_after_freeze", symbol_after_freeze),
];

fn storage(context: &HsaContext, size: usize) -> Result<Memory> {
    let region = context.fine_grained_region.ok_or_else(|| {
        HsaError::CaseSkipped("no fine-grained region for variable storage".to_string())
    })?;
    region.allocate(context.runtime(), size)
}

fn create_not_initialized(env: &CaseEnv) -> Result<()> {
    assert_status!(
        env.runtime.executable_create(Profile::Full),
        Status::NotInitialized
    );
    Ok(())
}

fn create_destroy(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    for profile in [Profile::Base, Profile::Full] {
        let exe = rt.executable_create(profile)?;
        assert_ne!(exe.handle(), 0, "zero executable handle");
        assert_eq!(rt.executable_state(exe)?, ExecutableState::Unfrozen);
        assert_status!(rt.executable_destroy(exe), Status::Success);
    }
    session.close()
}

fn destroy_invalid(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.executable_destroy(ExecutableHandle::from_raw(0)),
        Status::InvalidExecutable | Status::InvalidArgument
    );
    let exe = rt.executable_create(Profile::Full)?;
    rt.executable_destroy(exe)?;
    assert_status!(
        rt.executable_destroy(exe),
        Status::InvalidExecutable | Status::InvalidArgument
    );
    session.close()
}

fn double_freeze(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let exe = Executable::create(session.runtime(), Profile::Full)?;
    assert_status!(exe.freeze(), Status::Success);
    assert_eq!(exe.state()?, ExecutableState::Frozen);
    assert_status!(exe.freeze(), Status::FrozenExecutable);
    exe.destroy()?;
    session.close()
}

fn define_after_freeze(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let memory = storage(&context, 64)?;
    let exe = Executable::create(context.runtime(), Profile::Full)?;
    exe.freeze()?;
    assert_status!(
        exe.define_global_variable("late", &memory),
        Status::FrozenExecutable
    );
    exe.destroy()
}

fn duplicate_definition(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let memory = storage(&context, 64)?;
    let exe = Executable::create(context.runtime(), Profile::Full)?;
    assert_status!(exe.define_global_variable("dup", &memory), Status::Success);
    assert_status!(
        exe.define_global_variable("dup", &memory),
        Status::VariableAlreadyDefined
    );
    exe.destroy()
}

fn missing_symbol(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let exe = Executable::create(session.runtime(), Profile::Full)?;
    exe.freeze()?;
    assert_status!(exe.symbol("absent", None), Status::InvalidSymbolName);
    exe.destroy()?;
    session.close()
}

fn symbol_after_freeze(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let memory = storage(&context, 256)?;
    let exe = Executable::create(context.runtime(), Profile::Full)?;
    exe.define_global_variable("table", &memory)?;
    exe.freeze()?;

    let symbol = exe.symbol("table", None)?;
    assert_eq!(symbol.kind, SymbolKind::Variable);
    assert_eq!(symbol.name, "table");
    assert_eq!(symbol.address, memory.as_ptr() as u64);
    let again = exe.symbol("table", Some(context.agent))?;
    assert_eq!(
        again.address, symbol.address,
        "agent lookup moved the variable"
    );
    exe.destroy()
}
