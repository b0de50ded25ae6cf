//! Module-level LLVM IR generation
//!
//! [`ModuleGenerator`] walks the annotated program once, lays out the types
//! it meets, and queues every function body it references. Bodies are then
//! generated from the worklist until it is empty. The per-function work lives
//! in the sibling modules (`expr`, `stmt`, `call`, ...), all as further
//! `impl` blocks on the same generator.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace};

use crate::config::{CodegenConfig, DiagnosticMode};
use crate::frontend::ast::{Decl, DeclId, Expr, ExprKind, Literal, Program};
use crate::middle::capture::CaptureAnalyzer;
use crate::middle::debug_info::DebugInfo;
use crate::middle::ir::{Declaration, Global, IrModule, IrType};
use crate::middle::monomorph::{instance_name, is_concrete, linkage, mangled_name, Instantiation, Monomorphizer};
use crate::middle::symbols::SymbolTable;
use crate::middle::type_resolver::{substitute_type, type_map, TypeMap, TypeResolver};
use crate::types::{FunctionType, TypeNode};
use crate::utils::{Error, Result};

use super::closure::PendingLambda;
use super::context::{FunctionContext, Local};
use super::debug::PRODUCER;
use super::layout::{EnumLayout, StructLayout};

/// Builds one IR module from one program
pub struct ModuleGenerator<'p> {
    pub(super) program: &'p Program,
    pub(super) types: TypeResolver<'p>,
    pub(super) config: &'p CodegenConfig,
    pub(super) module: IrModule,
    pub(super) ctx: FunctionContext,
    pub(super) structs: HashMap<String, StructLayout>,
    pub(super) enums: HashMap<String, EnumLayout>,
    /// Layouts currently being computed (recursive references through pointers)
    pub(super) laying_out: HashSet<String>,
    /// Structs that have a parent or are one
    pub(super) inheritance: HashSet<DeclId>,
    pub(super) mono: Monomorphizer,
    pub(super) captures: CaptureAnalyzer,
    pub(super) lambdas: VecDeque<PendingLambda<'p>>,
    pub(super) lambda_count: usize,
    /// Present when `debug_info` is on
    pub(super) debug: Option<DebugInfo>,
    qualified: HashMap<DeclId, String>,
    strings: HashMap<String, String>,
    type_ids: HashMap<String, u32>,
    next_type_id: u32,
    diagnostics: Vec<Error>,
}

impl<'p> ModuleGenerator<'p> {
    pub fn new(program: &'p Program, symbols: &'p SymbolTable, config: &'p CodegenConfig) -> Self {
        let types = TypeResolver::new(program, symbols);
        let mut module = IrModule::new(&config.module_name);
        module.target_triple = config.target_triple.clone();

        let mut inheritance = HashSet::new();
        for id in program.ids() {
            if let Some(parent) = program.struct_decl(id).and_then(|s| s.parent.as_ref()) {
                inheritance.insert(id);
                if let Some(p) = types.declaration_of(parent) {
                    inheritance.insert(p);
                }
            }
        }

        let type_ids = [("i32", 1), ("i1", 2), ("double", 3), ("i8*", 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            program,
            types,
            config,
            module,
            ctx: FunctionContext::default(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            laying_out: HashSet::new(),
            inheritance,
            mono: Monomorphizer::new(),
            captures: CaptureAnalyzer::new(),
            lambdas: VecDeque::new(),
            lambda_count: 0,
            debug: config.debug_info.then(|| DebugInfo::new(&config.source_path(), PRODUCER)),
            qualified: qualified_names(program),
            strings: HashMap::new(),
            type_ids,
            next_type_id: 10,
            diagnostics: Vec::new(),
        }
    }

    /// Generate the whole module
    pub fn generate(mut self) -> Result<(IrModule, Vec<Error>)> {
        self.declare_runtime()?;

        let program = self.program;
        for id in program.ids() {
            let result = match program.decl(id) {
                Some(Decl::Struct(s)) if s.generic_params.is_empty() => self.seed_struct(id),
                Some(Decl::Enum(e)) if e.generic_params.is_empty() => self.seed_enum(id),
                Some(Decl::Function(f)) if f.owner.is_none() && !f.is_generic() => {
                    self.request_function(id, &[], &[]).map(|_| ())
                }
                Some(Decl::Global(_)) => self.emit_global(id),
                _ => Ok(()),
            };
            if let Err(err) = result {
                self.report(err)?;
            }
        }

        self.drain()?;
        if let Some(info) = self.debug.take() {
            self.module.metadata = info.finish();
        }
        debug!(
            "module {}: {} functions, {} types, {} diagnostics",
            self.module.name,
            self.module.functions.len(),
            self.module.type_defs.len(),
            self.diagnostics.len()
        );
        Ok((self.module, self.diagnostics))
    }

    /// Lay out a non-generic struct and queue its non-generic methods
    fn seed_struct(&mut self, id: DeclId) -> Result<()> {
        let program = self.program;
        let Some(decl) = program.struct_decl(id) else {
            return Ok(());
        };
        self.lower_type(&TypeNode::basic(&decl.name).with_declaration(id))?;
        for method in &decl.methods {
            if program.function(*method).map_or(false, |f| !f.is_generic()) {
                self.request_function(*method, &[], &[])?;
            }
        }
        Ok(())
    }

    fn seed_enum(&mut self, id: DeclId) -> Result<()> {
        let program = self.program;
        let Some(decl) = program.enum_decl(id) else {
            return Ok(());
        };
        self.lower_type(&TypeNode::basic(&decl.name).with_declaration(id))?;
        for method in &decl.methods {
            if program.function(*method).map_or(false, |f| !f.is_generic()) {
                self.request_function(*method, &[], &[])?;
            }
        }
        Ok(())
    }

    /// Generate queued function bodies and lambdas until both queues are empty
    fn drain(&mut self) -> Result<()> {
        loop {
            if let Some(inst) = self.mono.next() {
                let name = inst.mangled.clone();
                trace!("{} more instantiations pending", self.mono.pending());
                if let Err(err) = self.emit_function(inst) {
                    debug!("dropping {} after error: {}", name, err);
                    self.report(err)?;
                }
            } else if let Some(lambda) = self.lambdas.pop_front() {
                let name = lambda.name.clone();
                if let Err(err) = self.emit_lambda(lambda) {
                    debug!("dropping {} after error: {}", name, err);
                    self.report(err)?;
                }
            } else {
                return Ok(());
            }
        }
    }

    // ==================== Diagnostics ====================

    /// Record a user error in collect-all mode, otherwise propagate it
    pub(super) fn report(&mut self, err: Error) -> Result<()> {
        if self.config.diagnostics == DiagnosticMode::CollectAll && !err.is_internal() {
            debug!("collected diagnostic: {}", err);
            self.diagnostics.push(err);
            Ok(())
        } else {
            Err(err)
        }
    }

    // ==================== Types and names ====================

    /// A type with the active generic substitution applied and aliases expanded
    pub(super) fn resolve(&self, ty: &TypeNode) -> TypeNode {
        self.types.normalize(&substitute_type(ty, &self.ctx.type_map))
    }

    /// Resolved type of an expression
    ///
    /// Identifiers of locals fall back to the declared type when the checker
    /// left no annotation.
    pub(super) fn expr_type(&self, e: &Expr) -> Result<TypeNode> {
        if let Some(ty) = &e.ty {
            return Ok(self.resolve(ty));
        }
        if let ExprKind::Identifier { name, binding } = &e.kind {
            let id = match binding {
                Some(crate::frontend::ast::Binding::Local { id }) => Some(*id),
                _ => None,
            };
            if let Some(local) = self.ctx.lookup(id, name) {
                return Ok(local.ty.clone());
            }
        }
        if let ExprKind::Literal { value } = &e.kind {
            return Ok(match value {
                Literal::Int(_) => TypeNode::i32(),
                Literal::Float(_) => TypeNode::double(),
                Literal::Bool(_) => TypeNode::bool(),
                Literal::Char(_) => TypeNode::basic("char"),
                Literal::Str(_) => TypeNode::basic("i8").pointer(1),
                Literal::Null => TypeNode::basic("null"),
                Literal::NullPtr => TypeNode::basic("nullptr"),
            });
        }
        Err(Error::MissingAnnotation { what: format!("type of {} expression", e.kind_name()), span: e.span })
    }

    pub(super) fn expr_ir(&mut self, e: &Expr) -> Result<IrType> {
        let ty = self.expr_type(e)?;
        self.lower_resolved(&ty)
    }

    /// Dotted source path of a declaration (`std.io.print`)
    pub(super) fn qualified_name(&self, id: DeclId) -> String {
        if let Some(f) = self.program.function(id) {
            if let Some(owner) = f.owner {
                return format!("{}.{}", self.qualified_name(owner), f.name);
            }
        }
        self.qualified
            .get(&id)
            .cloned()
            .or_else(|| self.program.decl(id).map(|d| d.name().to_string()))
            .unwrap_or_default()
    }

    /// Symbol of a global variable
    pub(super) fn global_symbol(&self, id: DeclId) -> String {
        self.qualified_name(id).replace('.', "_")
    }

    /// Generic parameters of a struct or enum
    pub(super) fn owner_generic_params(&self, owner: DeclId) -> &'p [crate::frontend::ast::GenericParam] {
        match self.program.decl(owner) {
            Some(Decl::Struct(s)) => &s.generic_params,
            Some(Decl::Enum(e)) => &e.generic_params,
            _ => &[],
        }
    }

    /// Substitution active inside a function instance
    pub(super) fn function_type_map(&self, decl: DeclId, generic_args: &[TypeNode], owner_args: &[TypeNode]) -> TypeMap {
        let mut map = TypeMap::new();
        if let Some(f) = self.program.function(decl) {
            if let Some(owner) = f.owner {
                map.extend(type_map(self.owner_generic_params(owner), owner_args));
            }
            map.extend(type_map(&f.generic_params, generic_args));
        }
        map
    }

    /// Mangled name of a function instance, queueing its body
    ///
    /// `generic_args` and `owner_args` must already be concrete.
    pub(super) fn request_function(
        &mut self,
        decl: DeclId,
        generic_args: &[TypeNode],
        owner_args: &[TypeNode],
    ) -> Result<String> {
        let program = self.program;
        let f = program
            .function(decl)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not a function", decl.0)))?;
        let map = self.function_type_map(decl, generic_args, owner_args);

        let (base, owner) = match f.owner {
            Some(owner) => {
                let inst = instance_name(&self.qualified_name(owner), owner_args);
                (format!("{}_{}", inst, f.name), Some(inst))
            }
            None => (self.qualified_name(decl), None),
        };
        let signature = FunctionType {
            return_type: Box::new(self.types.normalize(&substitute_type(&f.return_type, &map))),
            param_types: f.params.iter().map(|p| self.types.normalize(&substitute_type(&p.ty, &map))).collect(),
            variadic: false,
            declaration: None,
        };
        let mangled = if owner.is_none() && f.name == "main" && base == "main" {
            "main".to_string()
        } else {
            mangled_name(&base, &signature, false, generic_args)
        };
        if !is_concrete(&map) {
            return Err(Error::Internal(format!("instantiation {} of '{}' is not concrete", mangled, f.name)));
        }
        if !self.mono.request(Instantiation { decl, mangled: mangled.clone(), type_map: map, owner }) {
            trace!("{} already requested", mangled);
        }
        Ok(mangled)
    }

    // ==================== Functions ====================

    fn emit_function(&mut self, inst: Instantiation) -> Result<()> {
        let program = self.program;
        let f = program
            .function(inst.decl)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not a function", inst.decl.0)))?;
        debug!("generating function {} from {}", inst.mangled, f.name);

        let is_main = inst.mangled == "main";
        self.ctx = FunctionContext::new(&inst.mangled, &f.name, inst.type_map.clone());
        let ret_ty = self.resolve(&f.return_type);
        let mut ret_ir = self.lower_resolved(&ret_ty)?;
        if is_main && ret_ir.is_void() {
            self.ctx.is_main_void = true;
            ret_ir = IrType::i32();
        }
        self.ctx.is_main = is_main;
        self.ctx.return_type = ret_ty;
        self.ctx.function.ret = ret_ir;
        let generic_instance = !inst.type_map.is_empty();
        self.ctx.function.linkage =
            linkage(&self.qualified_name(inst.decl), generic_instance, &self.config.std_lib_prefixes).to_string();

        let mut params = Vec::new();
        for p in &f.params {
            let ty = self.resolve(&p.ty);
            let ir = self.lower_resolved(&ty)?;
            params.push((p, ty, ir));
        }
        let param_types: Vec<TypeNode> = params.iter().map(|(_, ty, _)| ty.clone()).collect();
        let ret_ty = self.ctx.return_type.clone();
        self.begin_subprogram(&f.name, f.span, &ret_ty, &param_types);

        if is_main {
            self.ctx.function.params.push((IrType::i32(), "%argc".to_string()));
            self.ctx.function.params.push((IrType::i8_ptr().ptr(), "%argv".to_string()));
        } else {
            self.ctx.function.params.push((IrType::i8_ptr(), "%__closure_ctx".to_string()));
            for (p, _, ir) in &params {
                self.ctx.function.params.push((ir.clone(), format!("%{}", p.name)));
            }
        }

        self.emit_stack_check()?;

        if is_main {
            self.ctx.emit("store i32 %argc, i32* @__bpl_argc_value");
            self.ctx.emit("store i8** %argv, i8*** @__bpl_argv_value");
        }

        if !is_main {
            for (p, ty, ir) in params {
                self.bind_parameter(Some(p.id), &p.name, &format!("%{}", p.name), ty, ir)?;
            }
        }

        self.function_body(&f.body)?;
        self.implicit_return()?;

        let func = std::mem::take(&mut self.ctx).finish();
        self.module.functions.push(func);
        Ok(())
    }

    /// Spill an incoming parameter into a slot; struct values get a null flag
    pub(super) fn bind_parameter(
        &mut self,
        id: Option<crate::frontend::ast::NodeId>,
        name: &str,
        value: &str,
        ty: TypeNode,
        ir: IrType,
    ) -> Result<()> {
        let slot = self.ctx.slot(&format!("{}_ptr", name), &ir);
        self.ctx.emit(format!("store {} {}, {}* {}", ir, value, ir, slot));
        let null_flag = match &ir {
            IrType::Struct(layout_name) => {
                let index = self.struct_layout(layout_name)?.null_bit_index();
                let flag = self.ctx.slot(&format!("{}_null", name), &IrType::i1());
                let bit = self.ctx.reg();
                self.ctx.emit(format!("{} = extractvalue {} {}, {}", bit, ir, value, index));
                self.ctx.emit(format!("store i1 {}, i1* {}", bit, flag));
                Some(flag)
            }
            _ => None,
        };
        self.ctx.declare(id, name, Local { ptr: slot, ty, ir, null_flag });
        Ok(())
    }

    /// Return when control falls off the end of a body
    pub(super) fn implicit_return(&mut self) -> Result<()> {
        if self.ctx.is_terminated() {
            return Ok(());
        }
        self.emit_stack_release();
        let ret = self.ctx.function.ret.clone();
        if self.ctx.is_main_void {
            self.ctx.terminate("ret i32 0");
        } else if ret.is_void() {
            self.ctx.terminate("ret void");
        } else if ret.is_aggregate() {
            self.ctx.terminate("unreachable");
        } else {
            self.ctx.terminate(format!("ret {} {}", ret, ret.zero()));
        }
        Ok(())
    }

    /// Increment the call depth and raise `StackOverflowError` past the limit
    pub(super) fn emit_stack_check(&mut self) -> Result<()> {
        let depth = self.ctx.reg();
        let next = self.ctx.reg();
        let over = self.ctx.reg();
        self.ctx.emit(format!("{} = load i32, i32* @__bpl_stack_depth", depth));
        self.ctx.emit(format!("{} = add i32 {}, 1", next, depth));
        self.ctx.emit(format!("store i32 {}, i32* @__bpl_stack_depth", next));
        self.ctx.emit(format!("{} = icmp ugt i32 {}, {}", over, next, self.config.stack_depth_limit));
        let err = self.ctx.label("stack_err");
        let ok = self.ctx.label("stack_ok");
        self.ctx.cond_branch(&over, &err, &ok);
        self.ctx.start_block(&err);
        let (value, ty) = self.stack_overflow_error()?;
        self.emit_throw(&value, &ty)?;
        self.ctx.start_block(&ok);
        Ok(())
    }

    pub(super) fn emit_stack_release(&mut self) {
        let depth = self.ctx.reg();
        let prev = self.ctx.reg();
        self.ctx.emit(format!("{} = load i32, i32* @__bpl_stack_depth", depth));
        self.ctx.emit(format!("{} = sub i32 {}, 1", prev, depth));
        self.ctx.emit(format!("store i32 {}, i32* @__bpl_stack_depth", prev));
    }

    // ==================== Globals and constants ====================

    fn emit_global(&mut self, id: DeclId) -> Result<()> {
        let program = self.program;
        let Some(Decl::Global(g)) = program.decl(id) else {
            return Ok(());
        };
        let ty = self.resolve(&g.ty);
        let ir = self.lower_resolved(&ty)?;
        let init = match &g.init {
            None => self.constant_default(&ir)?,
            Some(e) => self.constant_initializer(e, &ir)?,
        };
        let name = self.global_symbol(id);
        debug!("global @{}: {}", name, ir);
        self.module.globals.push(Global { name, linkage: String::new(), constant: false, ty: ir, init, align: None });
        Ok(())
    }

    fn constant_initializer(&mut self, e: &Expr, ir: &IrType) -> Result<String> {
        let ExprKind::Literal { value } = &e.kind else {
            return Err(Error::Unsupported { what: "non-constant global initializer".to_string(), span: e.span });
        };
        Ok(match (value, ir) {
            (Literal::Int(n), IrType::Double) => float_literal(*n as f64),
            (Literal::Int(n), _) => n.to_string(),
            (Literal::Float(x), IrType::Double) => float_literal(*x),
            (Literal::Float(x), _) => (*x as i64).to_string(),
            (Literal::Bool(b), _) => if *b { "1" } else { "0" }.to_string(),
            (Literal::Char(c), _) => (*c as u32).to_string(),
            (Literal::Str(s), _) => self.string_constant(s),
            (Literal::Null | Literal::NullPtr, _) => ir.zero().to_string(),
        })
    }

    /// Default value as a constant expression (globals)
    fn constant_default(&mut self, ir: &IrType) -> Result<String> {
        match ir {
            IrType::Struct(name) => {
                let layout = self.struct_layout(name)?.clone();
                let mut parts = Vec::new();
                for field in &layout.fields {
                    let value = if field.name == super::layout::NULL_BIT {
                        "1".to_string()
                    } else if field.name == super::layout::VTABLE {
                        self.vtable_pointer(&layout)
                    } else {
                        self.constant_default(&field.ir)?
                    };
                    parts.push(format!("{} {}", field.ir, value));
                }
                Ok(format!("{{ {} }}", parts.join(", ")))
            }
            other => Ok(other.zero().to_string()),
        }
    }

    /// Pointer to a private NUL-terminated string constant
    pub(super) fn string_constant(&mut self, text: &str) -> String {
        let len = text.len() + 1;
        let name = match self.strings.get(text) {
            Some(name) => name.clone(),
            None => {
                let name = format!(".str.{}", self.strings.len());
                self.module.globals.push(Global {
                    name: name.clone(),
                    linkage: "private unnamed_addr".to_string(),
                    constant: true,
                    ty: IrType::i8().array(len as u64),
                    init: format!("c\"{}\\00\"", escape_string(text)),
                    align: Some(1),
                });
                self.strings.insert(text.to_string(), name.clone());
                name
            }
        };
        format!("getelementptr inbounds ([{} x i8], [{} x i8]* @{}, i64 0, i64 0)", len, len, name)
    }

    /// Numeric id of an exception payload type
    pub(super) fn type_id(&mut self, ir: &IrType) -> u32 {
        let key = ir.to_string();
        if let Some(id) = self.type_ids.get(&key) {
            return *id;
        }
        let id = self.next_type_id;
        self.next_type_id += 1;
        trace!("exception type id {} for {}", id, key);
        self.type_ids.insert(key, id);
        id
    }

    /// Declare an external function once
    pub(super) fn declare(&mut self, name: &str, ret: IrType, params: Vec<IrType>, variadic: bool, attrs: &[&str]) {
        if self.module.has_declaration(name) || self.module.function(name).is_some() {
            return;
        }
        self.module.declarations.push(Declaration {
            name: name.to_string(),
            ret,
            params,
            variadic,
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
        });
    }
}

/// Dotted names of every declaration, following module membership
fn qualified_names(program: &Program) -> HashMap<DeclId, String> {
    let mut parent = HashMap::new();
    for id in program.ids() {
        if let Some(Decl::Module(m)) = program.decl(id) {
            for member in &m.members {
                parent.insert(*member, id);
            }
        }
    }
    let mut names = HashMap::new();
    for id in program.ids() {
        let Some(decl) = program.decl(id) else {
            continue;
        };
        let mut name = decl.name().to_string();
        let mut current = id;
        let mut depth = 0;
        while let Some(p) = parent.get(&current) {
            let Some(module) = program.decl(*p) else {
                break;
            };
            name = format!("{}.{}", module.name(), name);
            current = *p;
            depth += 1;
            if depth > 64 {
                break;
            }
        }
        names.insert(id, name);
    }
    names
}

/// Escape a string for a `c"..."` constant: printable ASCII stays, the rest is `\XX`
pub(super) fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'"' && byte != b'\\' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\{:02X}", byte));
        }
    }
    out
}

/// Double constant spelled so the IR parser accepts it
pub(super) fn float_literal(x: f64) -> String {
    let text = format!("{:?}", x);
    if x.is_finite() && text.contains('.') {
        text
    } else {
        format!("0x{:016X}", x.to_bits())
    }
}
