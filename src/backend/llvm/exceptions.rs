//! Runtime support and the exception frame protocol
//!
//! A `try` links a stack-allocated `%struct.ExceptionFrame` (a `jmp_buf` and
//! the previous top) into `@exception_top` and calls `setjmp`. A `throw`
//! stores the payload's type id and value into `@exception_type` and
//! `@exception_value` and `longjmp`s to the top frame, or exits with status 1
//! when there is none. Struct payloads travel as a pointer to a heap copy;
//! scalars are reinterpreted as an `i64`.

use log::{debug, warn};

use crate::config::UnhandledException;
use crate::frontend::ast::{Block, CatchClause};
use crate::middle::ir::{Global, IrType, TypeDef};
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::context::Local;
use super::layout::{FieldSlot, StructLayout, NULL_BIT, VTABLE};

/// Payload types raised by generated code itself
pub const RUNTIME_ERRORS: [&str; 4] =
    ["NullAccessError", "DivisionByZeroError", "IndexOutOfBoundsError", "StackOverflowError"];

const FRAME: &str = "ExceptionFrame";

fn frame_type() -> IrType {
    IrType::Struct(FRAME.to_string())
}

/// Fields of the builtin layout used when a program does not declare the error itself
fn runtime_error_fields(name: &str) -> Vec<(&'static str, TypeNode)> {
    let text = || TypeNode::basic("i8").pointer(1);
    match name {
        "NullAccessError" => vec![("message", text()), ("function", text()), ("expression", text())],
        "DivisionByZeroError" => vec![("code", TypeNode::basic("i8"))],
        "IndexOutOfBoundsError" => vec![("index", TypeNode::i64()), ("size", TypeNode::i64())],
        "StackOverflowError" => vec![("message", text()), ("code", TypeNode::i32())],
        _ => Vec::new(),
    }
}

impl<'p> ModuleGenerator<'p> {
    /// Runtime externs, the frame type, the shared globals and builtin error layouts
    pub(super) fn declare_runtime(&mut self) -> Result<()> {
        let i8p = IrType::i8_ptr();
        self.declare("malloc", i8p.clone(), vec![IrType::i64()], false, &[]);
        self.declare("free", IrType::Void, vec![i8p.clone()], false, &[]);
        self.declare("exit", IrType::Void, vec![IrType::i32()], false, &[]);
        self.declare("memcmp", IrType::i32(), vec![i8p.clone(), i8p.clone(), IrType::i64()], false, &[]);
        self.declare("setjmp", IrType::i32(), vec![i8p.clone()], false, &["returns_twice"]);
        self.declare("longjmp", IrType::Void, vec![i8p, IrType::i32()], false, &["noreturn"]);

        self.module.type_defs.push(TypeDef {
            name: format!("struct.{}", FRAME),
            fields: vec![IrType::i64().array(32), frame_type().ptr()],
        });

        let weak = [
            ("exception_top", frame_type().ptr()),
            ("exception_value", IrType::i64()),
            ("exception_type", IrType::i32()),
            ("__bpl_argc_value", IrType::i32()),
            ("__bpl_argv_value", IrType::i8_ptr().ptr()),
            ("__bpl_stack_depth", IrType::i32()),
        ];
        for (name, ty) in weak {
            let init = ty.zero().to_string();
            self.module.globals.push(Global {
                name: name.to_string(),
                linkage: "weak".to_string(),
                constant: false,
                ty,
                init,
                align: None,
            });
        }

        for name in RUNTIME_ERRORS {
            if self.types.struct_by_name(name).is_some() {
                continue;
            }
            let mut fields: Vec<FieldSlot> = Vec::new();
            for (field, ty) in runtime_error_fields(name) {
                let ir = self.lower_resolved(&ty)?;
                fields.push(FieldSlot { name: field.to_string(), ty, ir });
            }
            fields.push(FieldSlot { name: NULL_BIT.to_string(), ty: TypeNode::bool(), ir: IrType::i1() });
            self.module.type_defs.push(TypeDef {
                name: format!("struct.{}", name),
                fields: fields.iter().map(|f| f.ir.clone()).collect(),
            });
            debug!("builtin runtime error layout {}", name);
            self.structs.insert(
                name.to_string(),
                StructLayout {
                    name: name.to_string(),
                    decl: None,
                    parent: None,
                    type_map: Default::default(),
                    fields,
                    vtable: None,
                },
            );
        }
        Ok(())
    }

    // ==================== Runtime error values ====================

    /// Build a runtime error value, setting the named fields and defaulting the rest
    pub(super) fn runtime_error(
        &mut self,
        name: &str,
        values: Vec<(&str, String, IrType)>,
        span: Span,
    ) -> Result<(String, IrType)> {
        let ir = if self.types.struct_by_name(name).is_some() {
            self.lower_resolved(&TypeNode::basic(name))?
        } else {
            IrType::Struct(name.to_string())
        };
        let IrType::Struct(layout_name) = &ir else {
            return Err(Error::Internal(format!("{} does not lower to a struct", name)));
        };
        let layout = self.struct_layout(layout_name)?.clone();

        let mut acc = "undef".to_string();
        for (index, field) in layout.fields.iter().enumerate() {
            let value = if let Some((_, value, from)) = values.iter().find(|(n, _, _)| *n == field.name) {
                self.cast_ir(value, from, &field.ir, true, field.ty.is_signed(), span)?
            } else if field.name == NULL_BIT {
                "1".to_string()
            } else if field.name == VTABLE {
                self.vtable_pointer(&layout)
            } else {
                self.default_value(&field.ir)?
            };
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} {}, {} {}, {}", reg, ir, acc, field.ir, value, index));
            acc = reg;
        }
        Ok((acc, ir))
    }

    pub(super) fn stack_overflow_error(&mut self) -> Result<(String, IrType)> {
        let message = self.string_constant("Stack overflow");
        self.runtime_error(
            "StackOverflowError",
            vec![("message", message, IrType::i8_ptr()), ("code", "9".to_string(), IrType::i32())],
            Span::dummy(),
        )
    }

    /// Branch on a validity flag and raise `NullAccessError` when it is clear
    pub(super) fn null_guard(&mut self, flag: &str, expression: &str, message: &str, span: Span) -> Result<()> {
        let err = self.ctx.label("null_err");
        let ok = self.ctx.label("null_ok");
        self.ctx.cond_branch(flag, &ok, &err);
        self.ctx.start_block(&err);
        let message = self.string_constant(message);
        let function = self.ctx.source_name.clone();
        let function = self.string_constant(&function);
        let expression = self.string_constant(expression);
        let (value, ty) = self.runtime_error(
            "NullAccessError",
            vec![
                ("message", message, IrType::i8_ptr()),
                ("function", function, IrType::i8_ptr()),
                ("expression", expression, IrType::i8_ptr()),
            ],
            span,
        )?;
        self.emit_throw(&value, &ty)?;
        self.ctx.start_block(&ok);
        Ok(())
    }

    /// Guard a local's shadow flag, if it has one
    pub(super) fn guard_local(&mut self, local: &Local, expression: &str, message: &str, span: Span) -> Result<()> {
        let Some(flag_slot) = &local.null_flag else {
            return Ok(());
        };
        let flag = self.ctx.reg();
        self.ctx.emit(format!("{} = load i1, i1* {}", flag, flag_slot));
        self.null_guard(&flag, expression, message, span)
    }

    /// Raise `DivisionByZeroError` when an integer divisor is zero
    pub(super) fn division_guard(&mut self, divisor: &str, ty: &IrType, span: Span) -> Result<()> {
        let zero = self.ctx.reg();
        self.ctx.emit(format!("{} = icmp eq {} {}, 0", zero, ty, divisor));
        let err = self.ctx.label("div_zero");
        let ok = self.ctx.label("div_ok");
        self.ctx.cond_branch(&zero, &err, &ok);
        self.ctx.start_block(&err);
        let (value, err_ty) = self.runtime_error("DivisionByZeroError", Vec::new(), span)?;
        self.emit_throw(&value, &err_ty)?;
        self.ctx.start_block(&ok);
        Ok(())
    }

    /// Raise `IndexOutOfBoundsError` unless `0 <= index < size` (index as `i64`)
    pub(super) fn bounds_guard(&mut self, index: &str, size: u64, span: Span) -> Result<()> {
        let out = self.ctx.reg();
        self.ctx.emit(format!("{} = icmp uge i64 {}, {}", out, index, size));
        let err = self.ctx.label("bounds_err");
        let ok = self.ctx.label("bounds_ok");
        self.ctx.cond_branch(&out, &err, &ok);
        self.ctx.start_block(&err);
        let (value, ty) = self.runtime_error(
            "IndexOutOfBoundsError",
            vec![("index", index.to_string(), IrType::i64()), ("size", size.to_string(), IrType::i64())],
            span,
        )?;
        self.emit_throw(&value, &ty)?;
        self.ctx.start_block(&ok);
        Ok(())
    }

    // ==================== Throw ====================

    /// Store the payload and unwind to the innermost frame
    pub(super) fn emit_throw(&mut self, value: &str, ty: &IrType) -> Result<()> {
        let id = self.type_id(ty);
        self.ctx.emit(format!("store i32 {}, i32* @exception_type", id));
        let word = self.to_exception_word(value, ty)?;
        self.ctx.emit(format!("store i64 {}, i64* @exception_value", word));
        self.emit_raise();
        Ok(())
    }

    /// Jump to the innermost frame with the current payload, or exit when none is linked
    pub(super) fn emit_raise(&mut self) {
        let frame = frame_type();
        let top = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}*, {}** @exception_top", top, frame, frame));
        let none = self.ctx.reg();
        self.ctx.emit(format!("{} = icmp eq {}* {}, null", none, frame, top));
        let abort = self.ctx.label("throw.abort");
        let jump = self.ctx.label("throw.jump");
        self.ctx.cond_branch(&none, &abort, &jump);

        self.ctx.start_block(&abort);
        self.ctx.emit("call void @exit(i32 1)");
        self.ctx.terminate("unreachable");

        self.ctx.start_block(&jump);
        let buf = self.jmp_buf(&top);
        self.ctx.emit(format!("call void @longjmp(i8* {}, i32 1)", buf));
        self.ctx.terminate("unreachable");
    }

    /// `i8*` to the `jmp_buf` of a frame
    fn jmp_buf(&mut self, frame_ptr: &str) -> String {
        let frame = frame_type();
        let field = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 0", field, frame, frame, frame_ptr));
        let buf = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast [32 x i64]* {} to i8*", buf, field));
        buf
    }

    fn to_exception_word(&mut self, value: &str, ty: &IrType) -> Result<String> {
        let inst = match ty {
            IrType::Int(64) => return Ok(value.to_string()),
            IrType::Int(1) => format!("zext i1 {} to i64", value),
            IrType::Int(bits) => format!("sext i{} {} to i64", bits, value),
            IrType::Double => format!("bitcast double {} to i64", value),
            IrType::Ptr(_) => format!("ptrtoint {} {} to i64", ty, value),
            IrType::Void | IrType::Func { .. } => {
                return Err(Error::Unsupported { what: format!("throwing a value of type {}", ty), span: Span::dummy() })
            }
            _ => {
                let heap = self.heap_copy(value, ty);
                format!("ptrtoint {}* {} to i64", ty, heap)
            }
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {}", reg, inst));
        Ok(reg)
    }

    /// `malloc` a copy of an aggregate, returning the typed pointer
    fn heap_copy(&mut self, value: &str, ty: &IrType) -> String {
        let size = self.size_expr(ty);
        let raw = self.ctx.reg();
        self.ctx.emit(format!("{} = call i8* @malloc(i64 {})", raw, size));
        let typed = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast i8* {} to {}*", typed, raw, ty));
        self.ctx.emit(format!("store {} {}, {}* {}", ty, value, ty, typed));
        typed
    }

    /// Allocation size of `ty` computed with the null-GEP idiom
    pub(super) fn size_expr(&mut self, ty: &IrType) -> String {
        let end = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* null, i32 1", end, ty, ty));
        let size = self.ctx.reg();
        self.ctx.emit(format!("{} = ptrtoint {}* {} to i64", size, ty, end));
        size
    }

    /// Recover a caught payload of type `ty` from `@exception_value`
    fn from_exception_word(&mut self, word: &str, ty: &IrType) -> Result<String> {
        let inst = match ty {
            IrType::Int(64) => return Ok(word.to_string()),
            IrType::Int(bits) => format!("trunc i64 {} to i{}", word, bits),
            IrType::Double => format!("bitcast i64 {} to double", word),
            IrType::Ptr(_) => format!("inttoptr i64 {} to {}", word, ty),
            IrType::Void | IrType::Func { .. } => {
                return Err(Error::Unsupported { what: format!("catching a value of type {}", ty), span: Span::dummy() })
            }
            _ => {
                let ptr = self.ctx.reg();
                self.ctx.emit(format!("{} = inttoptr i64 {} to {}*", ptr, word, ty));
                let value = self.ctx.reg();
                self.ctx.emit(format!("{} = load {}, {}* {}", value, ty, ty, ptr));
                let raw = self.ctx.reg();
                self.ctx.emit(format!("{} = bitcast {}* {} to i8*", raw, ty, ptr));
                self.ctx.emit(format!("call void @free(i8* {})", raw));
                return Ok(value);
            }
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {}", reg, inst));
        Ok(reg)
    }

    // ==================== Try ====================

    /// Restore `@exception_top` for every try-region above `depth` before leaving them
    pub(super) fn unlink_frames(&mut self, depth: usize) {
        if let Some(prev) = self.ctx.try_frames.get(depth).cloned() {
            let frame = frame_type();
            self.ctx.emit(format!("store {}* {}, {}** @exception_top", frame, prev, frame));
        }
    }

    pub(super) fn try_stmt(
        &mut self,
        body: &'p Block,
        catches: &'p [CatchClause],
        catch_other: Option<&'p Block>,
        span: Span,
    ) -> Result<()> {
        let frame = frame_type();
        let slot = self.ctx.slot("exc_frame", &frame);
        let depth = self.ctx.reg();
        self.ctx.emit(format!("{} = load i32, i32* @__bpl_stack_depth", depth));
        let prev = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}*, {}** @exception_top", prev, frame, frame));
        let link = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 1", link, frame, frame, slot));
        self.ctx.emit(format!("store {}* {}, {}** {}", frame, prev, frame, link));
        self.ctx.emit(format!("store {}* {}, {}** @exception_top", frame, slot, frame));
        let buf = self.jmp_buf(&slot);
        let jumped = self.ctx.reg();
        self.ctx.emit(format!("{} = call i32 @setjmp(i8* {})", jumped, buf));
        let caught = self.ctx.reg();
        self.ctx.emit(format!("{} = icmp ne i32 {}, 0", caught, jumped));

        let body_label = self.ctx.label("try.body");
        let catch_label = self.ctx.label("try.catch");
        let end = self.ctx.label("try.end");
        self.ctx.cond_branch(&caught, &catch_label, &body_label);

        self.ctx.start_block(&body_label);
        self.ctx.try_frames.push(prev.clone());
        let result = self.scoped_block(body);
        self.ctx.try_frames.pop();
        result?;
        if !self.ctx.is_terminated() {
            self.ctx.emit(format!("store {}* {}, {}** @exception_top", frame, prev, frame));
            self.ctx.branch(&end);
        }

        // resumed by longjmp: unlink first, then dispatch on the type id
        self.ctx.start_block(&catch_label);
        self.ctx.emit(format!("store {}* {}, {}** @exception_top", frame, prev, frame));
        self.ctx.emit(format!("store i32 {}, i32* @__bpl_stack_depth", depth));
        let type_id = self.ctx.reg();
        self.ctx.emit(format!("{} = load i32, i32* @exception_type", type_id));

        for clause in catches {
            let ty = self.resolve(&clause.ty);
            let ir = self.lower_resolved(&ty)?;
            let id = self.type_id(&ir);
            let matches = self.ctx.reg();
            self.ctx.emit(format!("{} = icmp eq i32 {}, {}", matches, type_id, id));
            let clause_body = self.ctx.label("catch.body");
            let next = self.ctx.label("catch.check");
            self.ctx.cond_branch(&matches, &clause_body, &next);

            self.ctx.start_block(&clause_body);
            let snapshot = self.ctx.snapshot();
            let word = self.ctx.reg();
            self.ctx.emit(format!("{} = load i64, i64* @exception_value", word));
            let value = self.from_exception_word(&word, &ir)?;
            self.bind_parameter(Some(clause.id), &clause.name, &value, ty, ir)?;
            let result = self.block(&clause.body);
            self.ctx.restore(snapshot);
            result?;
            self.ctx.branch(&end);

            self.ctx.start_block(&next);
        }

        match catch_other {
            Some(block) => {
                self.scoped_block(block)?;
                self.ctx.branch(&end);
            }
            None => match self.config.unhandled_exception {
                UnhandledException::FallThrough => {
                    warn!(
                        "try at {} in {} has no catch-all; unmatched exceptions are swallowed",
                        span, self.ctx.source_name
                    );
                    self.ctx.branch(&end);
                }
                UnhandledException::Abort => self.emit_raise(),
            },
        }

        self.ctx.start_block(&end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::config::{CodegenConfig, UnhandledException};
    use crate::frontend::ast::{build, Binding, CallTarget, CatchClause, Decl, DeclId, ExprKind, Program, Stmt};
    use crate::types::TypeNode;
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    fn try_catch(catches: Vec<CatchClause>, catch_other: Option<Vec<Stmt>>) -> Program {
        single(
            TypeNode::i32(),
            vec![
                Stmt::Try {
                    body: build::block(vec![Stmt::Throw { value: build::int(3), span: Span::dummy() }]),
                    catches,
                    catch_other: catch_other.map(build::block),
                    span: Span::dummy(),
                },
                build::ret(Some(build::int(0))),
            ],
        )
    }

    fn catch_i32(body: Vec<Stmt>) -> CatchClause {
        CatchClause { id: build::next_id(), name: "e".into(), ty: TypeNode::i32(), body: build::block(body), span: Span::dummy() }
    }

    #[test]
    fn builtin_error_layouts_are_emitted() {
        let ir = compile(&Program::default());
        assert!(ir.contains("%struct.NullAccessError = type { i8*, i8*, i8*, i1 }"), "{}", ir);
        assert!(ir.contains("%struct.DivisionByZeroError = type { i8, i1 }"));
        assert!(ir.contains("%struct.IndexOutOfBoundsError = type { i64, i64, i1 }"));
        assert!(ir.contains("%struct.StackOverflowError = type { i8*, i32, i1 }"));
    }

    #[test]
    fn user_declared_error_replaces_the_builtin() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl(
            "DivisionByZeroError",
            vec![build::field("code", TypeNode::i32()), build::field("hint", TypeNode::basic("string"))],
        )));
        let ir = compile(&program);
        assert!(ir.contains("%struct.DivisionByZeroError = type { i32, i8*, i1 }"), "{}", ir);
        assert!(!ir.contains("%struct.DivisionByZeroError = type { i8, i1 }"));
    }

    #[test]
    fn throw_of_a_scalar_stores_id_and_word() {
        let ir = compile(&try_catch(vec![catch_i32(vec![build::ret(Some(build::int(1)))])], None));
        let f = function(&ir, "f_");
        assert!(f.contains("store i32 1, i32* @exception_type"), "{}", f);
        assert!(f.contains("sext i32 3 to i64"));
        assert!(f.contains("call i32 @setjmp(i8* "));
        assert!(f.contains("call void @longjmp(i8* "));
        assert!(f.contains("trunc i64 "));
        assert!(f.contains("catch.body."));
    }

    #[test]
    fn catch_path_unlinks_the_frame_and_restores_the_depth() {
        let ir = compile(&try_catch(vec![catch_i32(vec![])], None));
        let f = function(&ir, "f_");
        let all: Vec<&str> = f.lines().collect();
        let start = all.iter().position(|l| l.starts_with("try.catch.") && l.ends_with(':')).unwrap();
        let lines: Vec<&str> = all[start + 1..start + 3].iter().map(|l| l.trim()).collect();
        assert!(lines[0].starts_with("store %struct.ExceptionFrame* %r."), "{:?}", lines);
        assert!(lines[0].ends_with("%struct.ExceptionFrame** @exception_top"));
        assert!(lines[1].starts_with("store i32 %r."));
        assert!(lines[1].ends_with("i32* @__bpl_stack_depth"));
    }

    #[test]
    fn unmatched_exception_falls_through_by_default() {
        let ir = compile(&try_catch(vec![catch_i32(vec![])], None));
        let f = function(&ir, "f_");
        // the last catch.check block jumps straight to the end
        let last = f.rfind("catch.check.").unwrap();
        let block = &f[last..];
        let next_line = block.lines().nth(1).unwrap().trim();
        assert!(next_line.starts_with("br label %try.end."), "{}", block);
    }

    #[test]
    fn try_without_clauses_swallows_the_exception() {
        let ir = compile(&try_catch(vec![], None));
        let f = function(&ir, "f_");
        assert!(f.contains("call i32 @setjmp(i8* "), "{}", f);
        assert!(!f.contains("catch.body."));
        // dispatch has nothing to compare, so the catch path ends at try.end
        let start = f.find("\ntry.catch.").unwrap() + 1;
        let block: Vec<&str> = f[start..].lines().skip(1).map(str::trim).take_while(|l| !l.ends_with(':')).collect();
        assert_eq!(block.len(), 4, "{:?}", block);
        assert!(block[2].ends_with("= load i32, i32* @exception_type"));
        assert!(block[3].starts_with("br label %try.end."));
    }

    #[test]
    fn stack_overflow_in_a_callee_reaches_the_enclosing_catch() {
        let mut program = Program::default();
        let deep_id = DeclId(0);
        let n = build::param("n", TypeNode::i32());
        let recurse = |arg| {
            let callee = build::expr(
                ExprKind::Identifier { name: "deep".into(), binding: Some(Binding::Function { decl: deep_id }) },
                TypeNode::function(TypeNode::i32(), vec![TypeNode::i32()]),
            );
            build::call(callee, vec![arg], CallTarget::Function { decl: deep_id, generic_args: vec![] }, TypeNode::i32())
        };
        let again = recurse(build::local("n", n.id, TypeNode::i32()));
        assert_eq!(push_fn(&mut program, build::func("deep", vec![n], TypeNode::i32(), vec![build::ret(Some(again))])), deep_id);
        let overflow = CatchClause {
            id: build::next_id(),
            name: "e".into(),
            ty: TypeNode::basic("StackOverflowError"),
            body: build::block(vec![build::ret(Some(build::int(1)))]),
            span: Span::dummy(),
        };
        push_fn(
            &mut program,
            build::func(
                "f",
                vec![],
                TypeNode::i32(),
                vec![
                    Stmt::Try {
                        body: build::block(vec![build::stmt(recurse(build::int(0)))]),
                        catches: vec![overflow],
                        catch_other: None,
                        span: Span::dummy(),
                    },
                    build::ret(Some(build::int(0))),
                ],
            ),
        );
        let ir = compile(&program);

        let deep = function(&ir, "deep_i32");
        assert!(deep.contains("call i32 @deep_i32(i8* null, i32 %r."), "{}", deep);
        let err = deep.find("stack_err.").unwrap();
        let thrown = deep[err..]
            .lines()
            .map(str::trim)
            .find(|l| l.ends_with(", i32* @exception_type"))
            .unwrap();
        let id = thrown.trim_start_matches("store i32 ").trim_end_matches(", i32* @exception_type");
        assert!(deep[err..].contains("call void @longjmp(i8* "));

        let f = function(&ir, "f_");
        assert!(f.contains("call i32 @deep_i32(i8* null, i32 0)"), "{}", f);
        let dispatch = f
            .lines()
            .map(str::trim)
            .find(|l| l.contains("icmp eq i32 %r.") && l.ends_with(&format!(", {}", id)))
            .unwrap_or_else(|| panic!("no catch for type id {} in\n{}", id, f));
        assert!(dispatch.starts_with("%r."));
        assert!(f.contains("ret i32 1"));
    }

    #[test]
    fn abort_policy_reraises() {
        let config = CodegenConfig { unhandled_exception: UnhandledException::Abort, ..CodegenConfig::default() };
        let module = compile_with(&try_catch(vec![catch_i32(vec![])], None), config).unwrap();
        let f = function(&module.ir, "f_");
        let last = f.rfind("catch.check.").unwrap();
        let block = &f[last..];
        assert!(block.lines().nth(1).unwrap().contains("load %struct.ExceptionFrame*, %struct.ExceptionFrame** @exception_top"));
    }

    #[test]
    fn catch_other_runs_its_block() {
        let ir = compile(&try_catch(vec![], Some(vec![build::ret(Some(build::int(2)))])));
        let f = function(&ir, "f_");
        assert!(f.contains("ret i32 2"));
        assert_eq!(f.matches("call i32 @setjmp").count(), 1);
    }

    #[test]
    fn return_inside_try_unlinks_the_frame() {
        let program = single(
            TypeNode::i32(),
            vec![Stmt::Try {
                body: build::block(vec![build::ret(Some(build::int(5)))]),
                catches: vec![],
                catch_other: Some(build::block(vec![])),
                span: Span::dummy(),
            }],
        );
        let ir = compile(&program);
        let f = function(&ir, "f_");
        let ret = f.find("ret i32 5").unwrap();
        let before = &f[..ret];
        let unlink = before.rfind("** @exception_top").unwrap();
        let body = before.find("try.body.").unwrap();
        assert!(unlink > body);
    }
}
