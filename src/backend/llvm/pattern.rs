//! Enum construction and `match`
//!
//! An enum value is `{ i32 tag, [N x i8] payload }`. Payload fields are
//! written and read through byte offsets into the buffer, so every variant
//! shares one representation.

use log::trace;

use crate::frontend::ast::{ArmBody, Expr, MatchArm, Pattern, VariantPayload};
use crate::middle::ir::IrType;
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::context::MatchFrame;
use super::layout::{EnumLayout, PayloadField};

impl<'p> ModuleGenerator<'p> {
    /// Typed pointer to a payload field inside an enum stored at `slot`
    fn payload_pointer(&mut self, slot: &str, layout: &EnumLayout, field: &PayloadField) -> String {
        let ir = layout.ir();
        let data = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 1", data, ir, ir, slot));
        let bytes = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast [{} x i8]* {} to i8*", bytes, layout.data_size, data));
        let at = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr i8, i8* {}, i64 {}", at, bytes, field.offset));
        let typed = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast i8* {} to {}*", typed, at, field.ir));
        typed
    }

    fn enum_layout_of(&mut self, ty: &TypeNode, span: Span) -> Result<EnumLayout> {
        match self.lower_resolved(ty)? {
            IrType::Enum(name) => Ok(self.enum_layout(&name)?.clone()),
            other => Err(Error::TypeMismatch { expected: "enum".to_string(), got: other.to_string(), span }),
        }
    }

    pub(super) fn enum_variant(
        &mut self,
        e: &'p Expr,
        enum_type: &TypeNode,
        variant: &str,
        payload: &'p VariantPayload,
    ) -> Result<String> {
        let ty = match &e.ty {
            Some(_) => self.expr_type(e)?,
            None => self.resolve(enum_type),
        };
        let layout = self.enum_layout_of(&ty, e.span)?;
        let ir = layout.ir();
        let (tag, shape) = layout
            .variant(variant)
            .ok_or_else(|| Error::UnknownField { owner: layout.name.clone(), field: variant.to_string(), span: e.span })?;
        let fields = shape.payload.fields.clone();

        let values: Vec<(PayloadField, &'p Expr)> = match payload {
            VariantPayload::Unit => Vec::new(),
            VariantPayload::Tuple { values } => {
                if values.len() != fields.len() {
                    return Err(Error::TypeMismatch {
                        expected: format!("{} payload values", fields.len()),
                        got: values.len().to_string(),
                        span: e.span,
                    });
                }
                fields.iter().cloned().zip(values.iter()).collect()
            }
            VariantPayload::Struct { fields: inits } => {
                let mut pairs = Vec::with_capacity(inits.len());
                for init in inits {
                    let field = shape.payload.field(&init.name).cloned().ok_or_else(|| Error::UnknownField {
                        owner: format!("{}.{}", layout.name, variant),
                        field: init.name.clone(),
                        span: init.value.span,
                    })?;
                    pairs.push((field, &init.value));
                }
                pairs
            }
        };

        if values.is_empty() {
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} zeroinitializer, i32 {}, 0", reg, ir, tag));
            return Ok(reg);
        }

        // payload fields are evaluated before the buffer is touched
        let mut converted = Vec::with_capacity(values.len());
        for (field, value) in &values {
            converted.push(self.coerce(value, &field.ty)?);
        }
        let slot = self.ctx.slot("enum_tmp", &ir);
        self.ctx.emit(format!("store {} zeroinitializer, {}* {}", ir, ir, slot));
        let tag_ptr = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 0", tag_ptr, ir, ir, slot));
        self.ctx.emit(format!("store i32 {}, i32* {}", tag, tag_ptr));
        for ((field, _), value) in values.iter().zip(converted) {
            let ptr = self.payload_pointer(&slot, &layout, field);
            self.ctx.emit(format!("store {} {}, {}* {}", field.ir, value, field.ir, ptr));
        }
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", reg, ir, ir, slot));
        Ok(reg)
    }

    pub(super) fn match_expr(&mut self, e: &'p Expr, scrutinee: &'p Expr, arms: &'p [MatchArm]) -> Result<String> {
        let result_ty = self.expr_type(e)?;
        let result = self.lower_resolved(&result_ty)?;
        let scrutinee_ty = self.expr_type(scrutinee)?;
        let layout = self.enum_layout_of(&scrutinee_ty, scrutinee.span)?;
        for arm in arms {
            if let Some(variant) = arm.pattern.variant() {
                if layout.variant(variant).is_none() {
                    return Err(Error::UnknownField {
                        owner: layout.name.clone(),
                        field: variant.to_string(),
                        span: e.span,
                    });
                }
            }
        }

        let ir = layout.ir();
        let value = self.expr(scrutinee)?;
        let slot = self.ctx.slot("match_tmp", &ir);
        self.ctx.emit(format!("store {} {}, {}* {}", ir, value, ir, slot));
        let tag = self.ctx.reg();
        self.ctx.emit(format!("{} = extractvalue {} {}, 0", tag, ir, value));

        let arm_labels: Vec<String> = arms.iter().map(|_| self.ctx.label("match.arm")).collect();
        let default = self.ctx.label("match.default");
        let merge = self.ctx.label("match.end");
        trace!("match on {} with {} arms", layout.name, arms.len());
        self.dispatch(&tag, &layout, arms, &arm_labels, 0, &default);

        self.ctx.matches.push(MatchFrame { merge: merge.clone(), result: result.clone(), incoming: Vec::new() });
        let outcome = self.match_arms(&result_ty, &value, &slot, &scrutinee_ty, &tag, &layout, arms, &arm_labels, &default);
        let frame = self.ctx.matches.pop();
        outcome?;

        // every tag is covered by the checker; a value outside them is a bug
        self.ctx.start_block(&default);
        self.ctx.terminate("unreachable");
        self.ctx.start_block(&merge);

        let incoming = frame.map(|f| f.incoming).unwrap_or_default();
        if result.is_void() {
            return Ok(String::new());
        }
        if incoming.is_empty() {
            self.ctx.terminate("unreachable");
            return Ok("undef".to_string());
        }
        let edges: Vec<String> = incoming.iter().map(|(v, label)| format!("[ {}, %{} ]", v, label)).collect();
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = phi {} {}", reg, result, edges.join(", ")));
        Ok(reg)
    }

    /// Arm index chosen for each tag, considering arms from `first` on
    fn arm_for(arms: &[MatchArm], first: usize, variant: &str) -> Option<usize> {
        (first..arms.len()).find(|&i| arms[i].pattern.is_catch_all() || arms[i].pattern.variant() == Some(variant))
    }

    /// `switch` on the tag to the first candidate arm at or after `first`
    fn dispatch(&mut self, tag: &str, layout: &EnumLayout, arms: &[MatchArm], labels: &[String], first: usize, default: &str) {
        let mut term = format!("switch i32 {}, label %{} [", tag, default);
        for (index, variant) in layout.variants.iter().enumerate() {
            if let Some(arm) = Self::arm_for(arms, first, &variant.name) {
                term.push_str(&format!("\n  i32 {}, label %{}", index, labels[arm]));
            }
        }
        term.push_str("\n]");
        self.ctx.terminate(term);
    }

    #[allow(clippy::too_many_arguments)]
    fn match_arms(
        &mut self,
        result_ty: &TypeNode,
        value: &str,
        slot: &str,
        scrutinee_ty: &TypeNode,
        tag: &str,
        layout: &EnumLayout,
        arms: &'p [MatchArm],
        labels: &[String],
        default: &str,
    ) -> Result<()> {
        let result = self.lower_resolved(result_ty)?;
        for (i, arm) in arms.iter().enumerate() {
            self.ctx.start_block(&labels[i]);
            let snapshot = self.ctx.snapshot();
            let outcome = self.match_arm(arm, i, result_ty, &result, value, slot, scrutinee_ty, tag, layout, arms, labels, default);
            self.ctx.restore(snapshot);
            outcome?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn match_arm(
        &mut self,
        arm: &'p MatchArm,
        index: usize,
        result_ty: &TypeNode,
        result: &IrType,
        value: &str,
        slot: &str,
        scrutinee_ty: &TypeNode,
        tag: &str,
        layout: &EnumLayout,
        arms: &'p [MatchArm],
        labels: &[String],
        default: &str,
    ) -> Result<()> {
        self.bind_pattern(&arm.pattern, value, slot, scrutinee_ty, layout)?;

        if let Some(guard) = &arm.guard {
            let pass = self.condition(guard)?;
            let body = self.ctx.label("match.guarded");
            let next = match arm.pattern.variant() {
                Some(variant) => Self::arm_for(arms, index + 1, variant)
                    .map(|j| labels[j].clone())
                    .unwrap_or_else(|| default.to_string()),
                // a failed catch-all guard re-dispatches on the tag
                None => {
                    let label = self.ctx.label("match.next");
                    self.ctx.cond_branch(&pass, &body, &label);
                    self.ctx.start_block(&label);
                    self.dispatch(tag, layout, arms, labels, index + 1, default);
                    self.ctx.start_block(&body);
                    return self.arm_body(arm, result_ty, result);
                }
            };
            self.ctx.cond_branch(&pass, &body, &next);
            self.ctx.start_block(&body);
        }
        self.arm_body(arm, result_ty, result)
    }

    fn arm_body(&mut self, arm: &'p MatchArm, result_ty: &TypeNode, result: &IrType) -> Result<()> {
        let value = match &arm.body {
            ArmBody::Expr { expr } if result.is_void() => {
                self.expr(expr)?;
                None
            }
            ArmBody::Expr { expr } => Some(self.coerce(expr, result_ty)?),
            ArmBody::Block { block } => {
                self.block(block)?;
                // falling off the end of a block arm yields no value
                (!result.is_void()).then(|| "undef".to_string())
            }
        };
        if self.ctx.is_terminated() {
            return Ok(());
        }
        let from = self.ctx.current_label();
        let merge = match self.ctx.matches.last_mut() {
            Some(frame) => {
                if let Some(v) = value {
                    frame.incoming.push((v, from));
                }
                frame.merge.clone()
            }
            None => return Err(Error::Internal("match arm outside of a match".to_string())),
        };
        self.ctx.branch(&merge);
        Ok(())
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: &str, slot: &str, scrutinee_ty: &TypeNode, layout: &EnumLayout) -> Result<()> {
        match pattern {
            Pattern::Wildcard | Pattern::Enum { .. } => Ok(()),
            Pattern::Identifier { id, name } => {
                let ir = layout.ir();
                self.bind_parameter(Some(*id), name, value, scrutinee_ty.clone(), ir)
            }
            Pattern::EnumTuple { variant, bindings } => {
                let fields = self.variant_fields(layout, variant)?;
                for (name, field) in bindings.iter().zip(&fields) {
                    if name == "_" {
                        continue;
                    }
                    self.bind_payload_field(name, slot, layout, field)?;
                }
                Ok(())
            }
            Pattern::EnumStruct { variant, fields } => {
                let payload = self.variant_fields(layout, variant)?;
                for fp in fields {
                    let field = payload
                        .iter()
                        .find(|f| f.name.as_deref() == Some(fp.field.as_str()))
                        .cloned()
                        .ok_or_else(|| Error::UnknownField {
                            owner: format!("{}.{}", layout.name, variant),
                            field: fp.field.clone(),
                            span: Span::dummy(),
                        })?;
                    self.bind_payload_field(&fp.binding, slot, layout, &field)?;
                }
                Ok(())
            }
        }
    }

    fn variant_fields(&self, layout: &EnumLayout, variant: &str) -> Result<Vec<PayloadField>> {
        layout
            .variant(variant)
            .map(|(_, v)| v.payload.fields.clone())
            .ok_or_else(|| Error::UnknownField { owner: layout.name.clone(), field: variant.to_string(), span: Span::dummy() })
    }

    fn bind_payload_field(&mut self, name: &str, slot: &str, layout: &EnumLayout, field: &PayloadField) -> Result<()> {
        let ptr = self.payload_pointer(slot, layout, field);
        let loaded = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", loaded, field.ir, field.ir, ptr));
        self.bind_parameter(None, name, &loaded, field.ty.clone(), field.ir.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::frontend::ast::{
        build, ArmBody, BinaryOp, Decl, EnumDecl, EnumVariant, ExprKind, MatchArm, Pattern, Program, VariantData,
        VariantPayload,
    };
    use crate::types::TypeNode;
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    fn shape_program() -> Program {
        let mut program = Program::default();
        program.push(Decl::Enum(EnumDecl {
            name: "Shape".into(),
            generic_params: vec![],
            variants: vec![
                EnumVariant {
                    name: "Circle".into(),
                    data: VariantData::Tuple { types: vec![TypeNode::i32()] },
                    span: Span::dummy(),
                },
                EnumVariant {
                    name: "Rect".into(),
                    data: VariantData::Tuple { types: vec![TypeNode::basic("i8"), TypeNode::i64()] },
                    span: Span::dummy(),
                },
                EnumVariant { name: "Empty".into(), data: VariantData::Unit, span: Span::dummy() },
            ],
            methods: vec![],
            span: Span::dummy(),
        }));
        program
    }

    fn arm(pattern: Pattern, guard: Option<crate::frontend::ast::Expr>, value: crate::frontend::ast::Expr) -> MatchArm {
        MatchArm { pattern, guard, body: ArmBody::Expr { expr: Box::new(value) } }
    }

    #[test]
    fn variant_payload_is_stored_at_aligned_offsets() {
        let mut program = shape_program();
        let shape = TypeNode::basic("Shape");
        let rect = build::expr(
            ExprKind::EnumVariant {
                enum_type: shape.clone(),
                variant: "Rect".into(),
                payload: VariantPayload::Tuple {
                    values: vec![build::int_of(1, TypeNode::basic("i8")), build::int_of(2, TypeNode::i64())],
                },
            },
            shape.clone(),
        );
        push_fn(&mut program, build::func("f", vec![], shape, vec![build::ret(Some(rect))]));
        let ir = compile(&program);
        let f = function(&ir, "f_");
        assert!(f.contains("store %enum.Shape zeroinitializer, %enum.Shape* %enum_tmp."), "{}", f);
        assert!(f.contains("store i32 1, i32* %r."));
        assert!(f.contains("bitcast [16 x i8]* %r."));
        assert!(f.contains("getelementptr i8, i8* %r."));
        assert!(f.contains(", i64 0\n"));
        assert!(f.contains(", i64 8\n"));
        assert!(f.contains("store i64 2, i64* %r."));
    }

    #[test]
    fn unit_variant_is_a_constant_tag() {
        let mut program = shape_program();
        let shape = TypeNode::basic("Shape");
        let empty = build::expr(
            ExprKind::EnumVariant { enum_type: shape.clone(), variant: "Empty".into(), payload: VariantPayload::Unit },
            shape.clone(),
        );
        push_fn(&mut program, build::func("f", vec![], shape, vec![build::ret(Some(empty))]));
        let ir = compile(&program);
        assert!(function(&ir, "f_").contains("insertvalue %enum.Shape zeroinitializer, i32 2, 0"), "{}", ir);
    }

    #[test]
    fn match_switches_on_the_tag_and_merges_with_phi() {
        let mut program = shape_program();
        let shape = TypeNode::basic("Shape");
        let s = build::param("s", shape.clone());
        let r = build::next_id();
        let arms = vec![
            arm(
                Pattern::EnumTuple { variant: "Circle".into(), bindings: vec!["r".into()] },
                Some(build::binary(BinaryOp::Gt, build::local("r", r, TypeNode::i32()), build::int(0), TypeNode::bool())),
                build::local("r", r, TypeNode::i32()),
            ),
            arm(Pattern::Enum { variant: "Empty".into() }, None, build::int(0)),
            arm(Pattern::Wildcard, None, build::int(-1)),
        ];
        let m = build::expr(
            ExprKind::Match { scrutinee: Box::new(build::local("s", s.id, shape.clone())), arms },
            TypeNode::i32(),
        );
        push_fn(&mut program, build::func("f", vec![s], TypeNode::i32(), vec![build::ret(Some(m))]));
        let ir = compile(&program);
        let f = function(&ir, "f_Shape");
        assert!(f.contains("switch i32 %r."), "{}", f);
        assert!(f.contains(", label %match.default."));
        assert!(f.contains("\n    i32 0, label %match.arm."));
        assert!(f.contains("\n    i32 1, label %match.arm."));
        assert!(f.contains("\n    i32 2, label %match.arm."));
        assert!(f.contains("match.guarded."));
        assert!(f.contains("= phi i32 [ "));
        assert!(f.contains("unreachable"));
    }

    #[test]
    fn return_inside_a_block_arm_yields_to_the_match() {
        let mut program = shape_program();
        let shape = TypeNode::basic("Shape");
        let s = build::param("s", shape.clone());
        let arms = vec![
            MatchArm {
                pattern: Pattern::Enum { variant: "Empty".into() },
                guard: None,
                body: ArmBody::Block { block: build::block(vec![build::ret(Some(build::int(7)))]) },
            },
            arm(Pattern::Wildcard, None, build::int(1)),
        ];
        let m = build::expr(
            ExprKind::Match { scrutinee: Box::new(build::local("s", s.id, shape.clone())), arms },
            TypeNode::i32(),
        );
        push_fn(&mut program, build::func("f", vec![s], TypeNode::i32(), vec![build::ret(Some(m))]));
        let ir = compile(&program);
        let f = function(&ir, "f_Shape");
        assert!(f.contains("[ 7, %match.arm."), "{}", f);
        assert!(f.contains("[ 1, %match.arm."));
        // the only function-level return is after the match
        assert_eq!(f.matches("ret i32").count(), 1, "{}", f);
    }

    /// Blocks of a printed function as (label, trimmed lines)
    fn blocks(f: &str) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = Vec::new();
        for line in f.lines().skip(1) {
            if let Some(label) = line.strip_suffix(':').filter(|_| !line.starts_with(' ')) {
                out.push((label.to_string(), Vec::new()));
            } else if let (Some((_, body)), true) = (out.last_mut(), line.starts_with(' ')) {
                body.push(line.trim().to_string());
            }
        }
        out
    }

    #[test]
    fn failed_guard_falls_to_the_next_arm_for_the_same_variant() {
        let mut program = shape_program();
        let shape = TypeNode::basic("Shape");
        let s = build::param("s", shape.clone());
        let r = build::next_id();
        let above = |n| build::binary(BinaryOp::Gt, build::local("r", r, TypeNode::i32()), build::int(n), TypeNode::bool());
        let circle = || Pattern::EnumTuple { variant: "Circle".into(), bindings: vec!["r".into()] };
        let arms = vec![
            arm(circle(), Some(above(10)), build::int(1)),
            arm(circle(), Some(above(0)), build::int(2)),
            arm(Pattern::EnumTuple { variant: "Circle".into(), bindings: vec!["_".into()] }, None, build::int(3)),
            arm(Pattern::Wildcard, None, build::int(0)),
        ];
        let m = build::expr(
            ExprKind::Match { scrutinee: Box::new(build::local("s", s.id, shape.clone())), arms },
            TypeNode::i32(),
        );
        push_fn(&mut program, build::func("f", vec![s], TypeNode::i32(), vec![build::ret(Some(m))]));
        let ir = compile(&program);
        let f = function(&ir, "f_Shape");
        let blocks = blocks(f);

        let arm_labels: Vec<&str> =
            blocks.iter().map(|(label, _)| label.as_str()).filter(|l| l.starts_with("match.arm.")).collect();
        assert_eq!(arm_labels.len(), 4, "{}", f);
        let body_of = |label: &str| &blocks.iter().find(|(l, _)| l == label).unwrap().1;

        // each guard's false edge targets the following Circle arm
        for (guarded, next) in [(arm_labels[0], arm_labels[1]), (arm_labels[1], arm_labels[2])] {
            let term = body_of(guarded).last().unwrap();
            assert!(term.starts_with("br i1 %r."), "{}", term);
            assert!(term.contains(", label %match.guarded."));
            assert!(term.ends_with(&format!(", label %{}", next)), "{}", term);
        }
        assert!(f.contains(&format!("\n    i32 0, label %{}\n", arm_labels[0])), "{}", f);
        assert!(f.contains(&format!("\n    i32 1, label %{}\n", arm_labels[3])));

        // the phi lists exactly the blocks that branch to the merge
        let merge = blocks.iter().find(|(l, _)| l.starts_with("match.end.")).unwrap();
        let phi = merge.1.iter().find(|l| l.contains("= phi i32 ")).unwrap();
        let mut incoming: Vec<String> = phi
            .split("[ ")
            .skip(1)
            .filter_map(|edge| edge.split(", %").nth(1))
            .map(|label| label.trim_end_matches(|c| c == ']' || c == ' ' || c == ',').to_string())
            .collect();
        let target = format!("label %{}", merge.0);
        let mut predecessors: Vec<String> = blocks
            .iter()
            .filter(|(_, body)| body.last().is_some_and(|term| term.contains(&target)))
            .map(|(label, _)| label.clone())
            .collect();
        incoming.sort();
        predecessors.sort();
        assert_eq!(incoming.len(), 4, "{}", phi);
        assert_eq!(incoming, predecessors);
    }
}
