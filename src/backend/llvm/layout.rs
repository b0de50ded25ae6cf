//! Type lowering and aggregate layouts
//!
//! Structs lower to `%struct.Name` with the parent's fields first, an
//! optional vtable pointer, the struct's own fields and a trailing null bit.
//! Enums lower to `%enum.Name = type { i32, [N x i8] }`: a tag and a byte
//! buffer as large as the largest variant payload. Payload field offsets come
//! from [`PayloadLayout`], the single source used by construction, pattern
//! binding and comparison.

use log::debug;

use crate::frontend::ast::{DeclId, EnumDecl, StructDecl, VariantData};
use crate::middle::ir::{Global, IrType, TypeDef};
use crate::middle::monomorph::instance_name;
use crate::middle::type_resolver::{substitute_type, type_map, TypeMap};
use crate::types::{BasicType, PrimitiveType, TypeNode};
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;

/// Trailing validity bit of every struct
pub const NULL_BIT: &str = "__null_bit__";
/// Vtable pointer of structs taking part in inheritance
pub const VTABLE: &str = "__vtable__";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub ty: TypeNode,
    pub ir: IrType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VtableSlot {
    pub method: String,
    pub decl: DeclId,
    pub symbol: String,
    /// `ret (i8*, this, params...)`
    pub fn_type: IrType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vtable {
    pub global: String,
    pub slots: Vec<VtableSlot>,
}

impl Vtable {
    pub fn slot(&self, method: &str) -> Option<(usize, &VtableSlot)> {
        self.slots.iter().enumerate().find(|(_, s)| s.method == method)
    }

    /// `bitcast ([n x i8*]* @X_vtable to i8*)`
    pub fn pointer(&self) -> String {
        format!("bitcast ([{} x i8*]* @{} to i8*)", self.slots.len(), self.global)
    }
}

/// Field order of a struct instance
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    /// Instance name (`Box_i32`)
    pub name: String,
    pub decl: Option<DeclId>,
    pub parent: Option<String>,
    pub type_map: TypeMap,
    pub fields: Vec<FieldSlot>,
    pub vtable: Option<Vtable>,
}

impl StructLayout {
    pub fn ir(&self) -> IrType {
        IrType::Struct(self.name.clone())
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }

    pub fn field(&self, field: &str) -> Option<(usize, &FieldSlot)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == field)
    }

    pub fn null_bit_index(&self) -> usize {
        self.fields.len().saturating_sub(1)
    }
}

/// One field inside a variant payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadField {
    /// Field name for struct variants
    pub name: Option<String>,
    pub ty: TypeNode,
    pub ir: IrType,
    pub offset: u64,
}

/// Byte offsets of a variant's payload fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadLayout {
    pub fields: Vec<PayloadField>,
    pub size: u64,
}

impl PayloadLayout {
    /// Lay out `(name, type, ir, size)` in order, aligning each field
    pub fn new(fields: Vec<(Option<String>, TypeNode, IrType, u64)>) -> Self {
        let mut offset = 0;
        let mut laid = Vec::with_capacity(fields.len());
        for (name, ty, ir, size) in fields {
            offset = round_up(offset, payload_align(size));
            laid.push(PayloadField { name, ty, ir, offset });
            offset += size;
        }
        Self { fields: laid, size: offset }
    }

    pub fn field(&self, name: &str) -> Option<&PayloadField> {
        self.fields.iter().find(|f| f.name.as_deref() == Some(name))
    }
}

/// Largest of 1, 2, 4 and 8 that does not exceed the field size
pub fn payload_align(size: u64) -> u64 {
    [8, 4, 2, 1].into_iter().find(|a| *a <= size).unwrap_or(1)
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantLayout {
    pub name: String,
    pub payload: PayloadLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumLayout {
    pub name: String,
    pub decl: DeclId,
    pub variants: Vec<VariantLayout>,
    /// Size of the payload buffer
    pub data_size: u64,
}

impl EnumLayout {
    pub fn ir(&self) -> IrType {
        IrType::Enum(self.name.clone())
    }

    pub fn variant(&self, name: &str) -> Option<(usize, &VariantLayout)> {
        self.variants.iter().enumerate().find(|(_, v)| v.name == name)
    }
}

impl<'p> ModuleGenerator<'p> {
    // ==================== Lowering ====================

    /// Lower a source type under the active generic substitution
    pub(super) fn lower_type(&mut self, ty: &TypeNode) -> Result<IrType> {
        let resolved = self.resolve(ty);
        self.lower_resolved(&resolved)
    }

    /// Lower a type that is already substituted and normalized
    pub(super) fn lower_resolved(&mut self, ty: &TypeNode) -> Result<IrType> {
        match ty {
            TypeNode::Meta { inner } => self.lower_resolved(inner),
            TypeNode::Tuple { elements } => {
                let parts = elements.iter().map(|e| self.lower_resolved(e)).collect::<Result<Vec<_>>>()?;
                Ok(IrType::Anon(parts))
            }
            TypeNode::Function(f) => {
                let ret = self.lower_resolved(&f.return_type)?;
                let params = f.param_types.iter().map(|p| self.lower_resolved(p)).collect::<Result<Vec<_>>>()?;
                Ok(IrType::closure(ret, params))
            }
            TypeNode::Basic(b) => {
                let mut ir = match PrimitiveType::from_name(&b.name) {
                    Some(PrimitiveType::Bool) => IrType::i1(),
                    Some(PrimitiveType::Int { bits, .. }) => IrType::Int(bits),
                    Some(PrimitiveType::Double) => IrType::Double,
                    Some(PrimitiveType::Void) if b.pointer_depth > 0 => IrType::i8(),
                    Some(PrimitiveType::Void) => IrType::Void,
                    Some(PrimitiveType::Str | PrimitiveType::Null | PrimitiveType::NullPtr) => IrType::i8_ptr(),
                    None => self.lower_named(b)?,
                };
                for _ in 0..b.pointer_depth {
                    ir = ir.ptr();
                }
                for dim in b.array_dimensions.iter().rev() {
                    ir = ir.array(*dim);
                }
                Ok(ir)
            }
        }
    }

    fn lower_named(&mut self, b: &BasicType) -> Result<IrType> {
        let value = TypeNode::Basic(BasicType {
            pointer_depth: 0,
            array_dimensions: Vec::new(),
            ..b.clone()
        });
        if let Some((id, decl)) = self.types.struct_of(&value) {
            return self.ensure_struct(id, decl, &b.generic_args);
        }
        if let Some((id, decl)) = self.types.enum_of(&value) {
            return self.ensure_enum(id, decl, &b.generic_args);
        }
        if self.structs.contains_key(&b.name) {
            // runtime error structs the program does not declare itself
            return Ok(IrType::Struct(b.name.clone()));
        }
        Err(Error::UnknownType { name: b.name.clone(), span: Span::dummy() })
    }

    // ==================== Structs ====================

    pub(super) fn struct_layout(&self, name: &str) -> Result<&StructLayout> {
        self.structs
            .get(name)
            .ok_or_else(|| Error::LayoutMissing { name: format!("struct {}", name), span: Span::dummy() })
    }

    pub(super) fn enum_layout(&self, name: &str) -> Result<&EnumLayout> {
        self.enums
            .get(name)
            .ok_or_else(|| Error::LayoutMissing { name: format!("enum {}", name), span: Span::dummy() })
    }

    /// Layout of the struct a (possibly pointer) type names
    pub(super) fn struct_layout_of(&mut self, ty: &TypeNode) -> Result<StructLayout> {
        let value = match ty.pointer_depth() {
            0 => ty.clone(),
            _ => ty.dereferenced().unwrap_or_else(|| ty.clone()),
        };
        match self.lower_resolved(&value)? {
            IrType::Struct(name) => Ok(self.struct_layout(&name)?.clone()),
            other => Err(Error::LayoutMissing { name: format!("struct for {}", other), span: Span::dummy() }),
        }
    }

    fn ensure_struct(&mut self, id: DeclId, decl: &'p StructDecl, args: &[TypeNode]) -> Result<IrType> {
        let name = instance_name(&self.qualified_name(id), args);
        if self.structs.contains_key(&name) || self.laying_out.contains(&name) {
            return Ok(IrType::Struct(name));
        }
        if args.len() != decl.generic_params.len() {
            return Err(Error::MissingAnnotation {
                what: format!("generic arguments for struct {}", decl.name),
                span: decl.span,
            });
        }

        self.laying_out.insert(name.clone());
        let built = self.build_struct_layout(id, decl, args, &name);
        self.laying_out.remove(&name);
        let layout = built?;

        debug!(
            "struct layout {}: [{}]",
            name,
            layout.fields.iter().map(|f| format!("{}: {}", f.name, f.ir)).collect::<Vec<_>>().join(", ")
        );
        self.module.type_defs.push(TypeDef {
            name: format!("struct.{}", name),
            fields: layout.fields.iter().map(|f| f.ir.clone()).collect(),
        });
        let wants_vtable = layout.decl.map_or(false, |d| self.inheritance.contains(&d)) && args.is_empty();
        self.structs.insert(name.clone(), layout);
        if wants_vtable {
            self.build_vtable(&name, decl)?;
        }
        Ok(IrType::Struct(name))
    }

    fn build_struct_layout(
        &mut self,
        id: DeclId,
        decl: &'p StructDecl,
        args: &[TypeNode],
        name: &str,
    ) -> Result<StructLayout> {
        let map = type_map(&decl.generic_params, args);
        let mut fields = Vec::new();
        let mut parent_name = None;
        let mut parent_has_vtable = false;

        if let Some(parent) = &decl.parent {
            let parent_ty = self.types.normalize(&substitute_type(parent, &map));
            let IrType::Struct(pname) = self.lower_resolved(&parent_ty)? else {
                return Err(Error::Internal(format!("parent of {} is not a struct", decl.name)));
            };
            let parent_layout = self.struct_layout(&pname)?;
            parent_has_vtable = parent_layout.index_of(VTABLE).is_some();
            let inherited = parent_layout.null_bit_index();
            fields.extend(parent_layout.fields[..inherited].iter().cloned());
            parent_name = Some(pname);
        }

        let has_vtable = decl.generic_params.is_empty() && self.inheritance.contains(&id);
        if has_vtable && !parent_has_vtable {
            fields.push(FieldSlot { name: VTABLE.to_string(), ty: TypeNode::void_ptr(), ir: IrType::i8_ptr() });
        }

        for field in &decl.fields {
            let ty = self.types.normalize(&substitute_type(&field.ty, &map));
            let ir = self.lower_resolved(&ty)?;
            fields.push(FieldSlot { name: field.name.clone(), ty, ir });
        }
        fields.push(FieldSlot { name: NULL_BIT.to_string(), ty: TypeNode::bool(), ir: IrType::i1() });

        Ok(StructLayout { name: name.to_string(), decl: Some(id), parent: parent_name, type_map: map, fields, vtable: None })
    }

    /// Vtable slots: the parent's first, overrides keep the parent's index
    fn build_vtable(&mut self, name: &str, decl: &'p StructDecl) -> Result<()> {
        let program = self.program;
        let mut slots = match self.struct_layout(name)?.parent.clone() {
            Some(parent) => self.nearest_vtable(&parent).map(|v| v.slots.clone()).unwrap_or_default(),
            None => Vec::new(),
        };

        for method in &decl.methods {
            let Some(f) = program.function(*method) else {
                continue;
            };
            if f.is_generic() || !f.has_receiver() {
                continue;
            }
            let symbol = self.request_function(*method, &[], &[])?;
            let fn_type = self.method_fn_type(*method, &TypeMap::new())?;
            let slot = VtableSlot { method: f.name.clone(), decl: *method, symbol, fn_type };
            match slots.iter_mut().find(|s| s.method == f.name) {
                Some(existing) => *existing = slot,
                None => slots.push(slot),
            }
        }

        let global = format!("{}_vtable", name);
        let init = if slots.is_empty() {
            "zeroinitializer".to_string()
        } else {
            let entries: Vec<String> = slots
                .iter()
                .map(|s| format!("i8* bitcast ({}* @{} to i8*)", s.fn_type, s.symbol))
                .collect();
            format!("[{}]", entries.join(", "))
        };
        debug!("vtable @{} with {} slots", global, slots.len());
        self.module.globals.push(Global {
            name: global.clone(),
            linkage: String::new(),
            constant: true,
            ty: IrType::i8_ptr().array(slots.len() as u64),
            init,
            align: None,
        });
        if let Some(layout) = self.structs.get_mut(name) {
            layout.vtable = Some(Vtable { global, slots });
        }
        Ok(())
    }

    /// Vtable of a struct or its closest ancestor that has one
    pub(super) fn nearest_vtable(&self, name: &str) -> Option<&Vtable> {
        let mut current = self.structs.get(name);
        while let Some(layout) = current {
            if let Some(vtable) = &layout.vtable {
                return Some(vtable);
            }
            current = layout.parent.as_ref().and_then(|p| self.structs.get(p));
        }
        None
    }

    /// Constant stored into a struct's `__vtable__` field
    pub(super) fn vtable_pointer(&self, layout: &StructLayout) -> String {
        match self.nearest_vtable(&layout.name) {
            Some(vtable) => vtable.pointer(),
            None => "null".to_string(),
        }
    }

    /// `ret (i8*, params...)` of a function declaration under `map`
    pub(super) fn method_fn_type(&mut self, decl: DeclId, map: &TypeMap) -> Result<IrType> {
        let program = self.program;
        let f = program
            .function(decl)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not a function", decl.0)))?;
        let ret_ty = self.types.normalize(&substitute_type(&f.return_type, map));
        let ret = self.lower_resolved(&ret_ty)?;
        let mut params = vec![IrType::i8_ptr()];
        for p in &f.params {
            let ty = self.types.normalize(&substitute_type(&p.ty, map));
            params.push(self.lower_resolved(&ty)?);
        }
        Ok(IrType::Func { ret: Box::new(ret), params, variadic: false })
    }

    // ==================== Enums ====================

    fn ensure_enum(&mut self, id: DeclId, decl: &'p EnumDecl, args: &[TypeNode]) -> Result<IrType> {
        let name = instance_name(&self.qualified_name(id), args);
        if self.enums.contains_key(&name) || self.laying_out.contains(&name) {
            return Ok(IrType::Enum(name));
        }
        if args.len() != decl.generic_params.len() {
            return Err(Error::MissingAnnotation {
                what: format!("generic arguments for enum {}", decl.name),
                span: decl.span,
            });
        }

        self.laying_out.insert(name.clone());
        let built = self.build_enum_layout(id, decl, args, &name);
        self.laying_out.remove(&name);
        let layout = built?;

        let mut fields = vec![IrType::i32()];
        if layout.data_size > 0 {
            fields.push(IrType::i8().array(layout.data_size));
        }
        debug!("enum layout {}: {} variants, {} payload bytes", name, layout.variants.len(), layout.data_size);
        self.module.type_defs.push(TypeDef { name: format!("enum.{}", name), fields });
        self.enums.insert(name.clone(), layout);
        Ok(IrType::Enum(name))
    }

    fn build_enum_layout(&mut self, id: DeclId, decl: &'p EnumDecl, args: &[TypeNode], name: &str) -> Result<EnumLayout> {
        let map = type_map(&decl.generic_params, args);
        let mut variants = Vec::with_capacity(decl.variants.len());
        for variant in &decl.variants {
            let raw: Vec<(Option<String>, &TypeNode)> = match &variant.data {
                VariantData::Unit => Vec::new(),
                VariantData::Tuple { types } => types.iter().map(|t| (None, t)).collect(),
                VariantData::Struct { fields } => fields.iter().map(|f| (Some(f.name.clone()), &f.ty)).collect(),
            };
            let mut fields = Vec::with_capacity(raw.len());
            for (field_name, ty) in raw {
                let ty = self.types.normalize(&substitute_type(ty, &map));
                let ir = self.lower_resolved(&ty)?;
                let size = self.size_of(&ir)?;
                fields.push((field_name, ty, ir, size));
            }
            variants.push(VariantLayout { name: variant.name.clone(), payload: PayloadLayout::new(fields) });
        }
        let data_size = variants.iter().map(|v| v.payload.size).max().unwrap_or(0);
        Ok(EnumLayout { name: name.to_string(), decl: id, variants, data_size })
    }

    // ==================== Sizes ====================

    /// Allocation size in bytes, including padding
    pub(super) fn size_of(&self, ir: &IrType) -> Result<u64> {
        Ok(match ir {
            IrType::Void => 0,
            IrType::Int(bits) => u64::from(bits.div_ceil(8)).max(1),
            IrType::Double | IrType::Ptr(_) | IrType::Func { .. } => 8,
            IrType::Array(elem, n) => self.size_of(elem)? * n,
            IrType::Enum(name) => round_up(4 + self.enum_layout(name)?.data_size, 4),
            IrType::Struct(name) => {
                let fields: Vec<IrType> = self.struct_layout(name)?.fields.iter().map(|f| f.ir.clone()).collect();
                self.aggregate_size(&fields)?
            }
            IrType::Anon(parts) => self.aggregate_size(parts)?,
        })
    }

    fn aggregate_size(&self, fields: &[IrType]) -> Result<u64> {
        let mut offset = 0;
        let mut max_align = 1;
        for field in fields {
            let align = self.align_of(field)?;
            max_align = max_align.max(align);
            offset = round_up(offset, align) + self.size_of(field)?;
        }
        Ok(round_up(offset, max_align))
    }

    fn align_of(&self, ir: &IrType) -> Result<u64> {
        Ok(match ir {
            IrType::Void => 1,
            IrType::Int(bits) => u64::from(bits.div_ceil(8)).clamp(1, 8),
            IrType::Double | IrType::Ptr(_) | IrType::Func { .. } => 8,
            IrType::Array(elem, _) => self.align_of(elem)?,
            IrType::Enum(_) => 4,
            IrType::Struct(name) => {
                let layout = self.struct_layout(name)?;
                let mut align = 1;
                for f in &layout.fields {
                    align = align.max(self.align_of(&f.ir)?);
                }
                align
            }
            IrType::Anon(parts) => {
                let mut align = 1;
                for p in parts {
                    align = align.max(self.align_of(p)?);
                }
                align
            }
        })
    }

    // ==================== Default values ====================

    /// Default value of a type, built with `insertvalue` for structs
    pub(super) fn default_value(&mut self, ir: &IrType) -> Result<String> {
        let IrType::Struct(name) = ir else {
            return Ok(ir.zero().to_string());
        };
        let layout = self.struct_layout(name)?.clone();
        let mut acc = "undef".to_string();
        for (index, field) in layout.fields.iter().enumerate() {
            let value = if field.name == NULL_BIT {
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
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::llvm::test_support::compile;
    use crate::frontend::ast::{build, Decl, EnumVariant, Program};
    use pretty_assertions::assert_eq;

    #[test]
    fn payload_offsets_are_aligned() {
        let layout = PayloadLayout::new(vec![
            (None, TypeNode::bool(), IrType::i1(), 1),
            (None, TypeNode::i32(), IrType::i32(), 4),
            (None, TypeNode::i64(), IrType::i64(), 8),
            (None, TypeNode::basic("i16"), IrType::Int(16), 2),
        ]);
        let offsets: Vec<u64> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!(layout.size, 18);
        assert_eq!(payload_align(12), 8);
        assert_eq!(payload_align(3), 2);
        assert_eq!(payload_align(0), 1);
    }

    #[test]
    fn struct_with_parent_and_vtable() {
        let mut program = Program::default();
        let mut area = build::func("area", vec![build::param("this", TypeNode::basic("Shape").pointer(1))], TypeNode::i32(), vec![
            build::ret(Some(build::int(0))),
        ]);
        area.owner = Some(DeclId(2));
        let area = program.push(Decl::Function(area));
        let mut sq_area = build::func("area", vec![build::param("this", TypeNode::basic("Square").pointer(1))], TypeNode::i32(), vec![
            build::ret(Some(build::int(4))),
        ]);
        sq_area.owner = Some(DeclId(3));
        let sq_area = program.push(Decl::Function(sq_area));
        let mut shape = build::struct_decl("Shape", vec![build::field("id", TypeNode::i32())]);
        shape.methods.push(area);
        program.push(Decl::Struct(shape));
        let mut square = build::struct_decl("Square", vec![build::field("side", TypeNode::double())]);
        square.parent = Some(TypeNode::basic("Shape"));
        square.methods.push(sq_area);
        program.push(Decl::Struct(square));

        let ir = compile(&program);
        assert!(ir.contains("%struct.Shape = type { i8*, i32, i1 }"), "{}", ir);
        assert!(ir.contains("%struct.Square = type { i8*, i32, double, i1 }"), "{}", ir);
        assert!(ir.contains(
            "@Shape_vtable = constant [1 x i8*] [i8* bitcast (i32 (i8*, %struct.Shape*)* @Shape_area_Shape_ptr to i8*)]"
        ));
        assert!(ir.contains(
            "@Square_vtable = constant [1 x i8*] [i8* bitcast (i32 (i8*, %struct.Square*)* @Square_area_Square_ptr to i8*)]"
        ));
    }

    #[test]
    fn enum_buffer_is_the_largest_payload() {
        let mut program = Program::default();
        program.push(Decl::Enum(EnumDecl {
            name: "Shape".into(),
            generic_params: vec![],
            variants: vec![
                EnumVariant { name: "Empty".into(), data: VariantData::Unit, span: Span::dummy() },
                EnumVariant {
                    name: "Rect".into(),
                    data: VariantData::Tuple { types: vec![TypeNode::i32(), TypeNode::double()] },
                    span: Span::dummy(),
                },
                EnumVariant {
                    name: "Dot".into(),
                    data: VariantData::Struct { fields: vec![build::field("on", TypeNode::bool())] },
                    span: Span::dummy(),
                },
            ],
            methods: vec![],
            span: Span::dummy(),
        }));
        program.push(Decl::Enum(EnumDecl {
            name: "Flag".into(),
            generic_params: vec![],
            variants: vec![EnumVariant { name: "On".into(), data: VariantData::Unit, span: Span::dummy() }],
            methods: vec![],
            span: Span::dummy(),
        }));
        let ir = compile(&program);
        assert!(ir.contains("%enum.Shape = type { i32, [16 x i8] }"), "{}", ir);
        assert!(ir.contains("%enum.Flag = type { i32 }"), "{}", ir);
    }

    #[test]
    fn arrays_wrap_from_the_last_dimension() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl(
            "Grid",
            vec![
                build::field("cells", TypeNode::i32().array(&[2, 3])),
                build::field("rows", TypeNode::basic("u8").pointer(1).array(&[4])),
                build::field("data", TypeNode::basic("void").pointer(1)),
            ],
        )));
        let ir = compile(&program);
        assert!(ir.contains("%struct.Grid = type { [2 x [3 x i32]], [4 x i8*], i8*, i1 }"), "{}", ir);
    }
}
