//! DWARF debug metadata
//!
//! Collects the `!N = ...` nodes of a module: one compile unit, the source
//! files, type descriptions, a `DISubprogram` per function and the
//! `DILocation`s instructions point at. Ids are handed out in creation
//! order; files, types and locations are interned so equal nodes share an id.

use std::collections::HashMap;
use std::path::Path;

/// Node builder for one module
#[derive(Debug)]
pub struct DebugInfo {
    nodes: Vec<String>,
    files: HashMap<String, u32>,
    types: HashMap<String, u32>,
    locations: HashMap<(u32, u32, u32), u32>,
    file: u32,
    unit: u32,
}

impl DebugInfo {
    /// Start a module compiled from `source`
    pub fn new(source: &str, producer: &str) -> Self {
        let mut info = Self {
            nodes: Vec::new(),
            files: HashMap::new(),
            types: HashMap::new(),
            locations: HashMap::new(),
            file: 0,
            unit: 0,
        };
        info.file = info.file(source);
        info.unit = info.add(format!(
            "distinct !DICompileUnit(language: DW_LANG_C, file: !{}, producer: {}, isOptimized: false, \
             runtimeVersion: 0, emissionKind: FullDebug, splitDebugInlining: false, nameTableKind: None)",
            info.file,
            quoted(producer)
        ));
        info
    }

    fn add(&mut self, node: String) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn interned(&mut self, key: String, node: impl FnOnce(&mut Self) -> String) -> u32 {
        if let Some(id) = self.types.get(&key) {
            return *id;
        }
        let node = node(self);
        let id = self.add(node);
        self.types.insert(key, id);
        id
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// The file the module was compiled from
    pub fn main_file(&self) -> u32 {
        self.file
    }

    pub fn file(&mut self, path: &str) -> u32 {
        if let Some(id) = self.files.get(path) {
            return *id;
        }
        let p = Path::new(path);
        let name = p.file_name().map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
        let directory = match p.parent().map(|d| d.to_string_lossy().into_owned()) {
            Some(d) if !d.is_empty() => d,
            _ => ".".to_string(),
        };
        let id = self.add(format!("!DIFile(filename: {}, directory: {})", quoted(&name), quoted(&directory)));
        self.files.insert(path.to_string(), id);
        id
    }

    /// `encoding` is a `DW_ATE_*` name
    pub fn basic_type(&mut self, name: &str, bits: u32, encoding: &str) -> u32 {
        self.interned(format!("basic:{}:{}", name, encoding), |_| {
            format!("!DIBasicType(name: {}, size: {}, encoding: {})", quoted(name), bits, encoding)
        })
    }

    /// Pointer to `base`; `None` is `void*`
    pub fn pointer_type(&mut self, base: Option<u32>) -> u32 {
        self.interned(format!("ptr:{}", reference(base)), |_| {
            format!("!DIDerivedType(tag: DW_TAG_pointer_type, baseType: {}, size: 64)", reference(base))
        })
    }

    pub fn array_type(&mut self, base: Option<u32>, count: u64) -> u32 {
        self.interned(format!("array:{}:{}", reference(base), count), |info| {
            let range = info.add(format!("!DISubrange(count: {})", count));
            let elements = info.add(format!("!{{!{}}}", range));
            format!("!DICompositeType(tag: DW_TAG_array_type, baseType: {}, elements: !{})", reference(base), elements)
        })
    }

    /// Aggregate described by name only (structs, enums, closures, tuples)
    pub fn opaque_type(&mut self, name: &str) -> u32 {
        self.interned(format!("opaque:{}", name), |info| {
            format!(
                "!DICompositeType(tag: DW_TAG_structure_type, name: {}, file: !{}, flags: DIFlagFwdDecl)",
                quoted(name),
                info.file
            )
        })
    }

    /// `ret` of `None` is void
    pub fn subroutine_type(&mut self, ret: Option<u32>, params: &[Option<u32>]) -> u32 {
        let types: Vec<String> = std::iter::once(ret).chain(params.iter().copied()).map(reference).collect();
        self.add(format!("!DISubroutineType(types: !{{{}}})", types.join(", ")))
    }

    pub fn subprogram(&mut self, name: &str, linkage_name: &str, line: u32, ty: u32, local: bool) -> u32 {
        let flags = if local { "DISPFlagLocalToUnit | DISPFlagDefinition" } else { "DISPFlagDefinition" };
        self.add(format!(
            "distinct !DISubprogram(name: {}, linkageName: {}, scope: !{file}, file: !{file}, line: {line}, type: !{ty}, \
             scopeLine: {line}, spFlags: {flags}, unit: !{unit})",
            quoted(name),
            quoted(linkage_name),
            file = self.file,
            line = line,
            ty = ty,
            flags = flags,
            unit = self.unit,
        ))
    }

    pub fn location(&mut self, line: u32, column: u32, scope: u32) -> u32 {
        if let Some(id) = self.locations.get(&(line, column, scope)) {
            return *id;
        }
        let id = self.add(format!("!DILocation(line: {}, column: {}, scope: !{})", line, column, scope));
        self.locations.insert((line, column, scope), id);
        id
    }

    /// Named metadata followed by every node, ready to print
    pub fn finish(mut self) -> Vec<String> {
        let version = self.add("!{i32 2, !\"Debug Info Version\", i32 3}".to_string());
        let dwarf = self.add("!{i32 7, !\"Dwarf Version\", i32 5}".to_string());
        let mut lines = vec![
            format!("!llvm.dbg.cu = !{{!{}}}", self.unit),
            format!("!llvm.module.flags = !{{!{}, !{}}}", version, dwarf),
        ];
        lines.extend(self.nodes.iter().enumerate().map(|(id, node)| format!("!{} = {}", id, node)));
        lines
    }
}

fn reference(id: Option<u32>) -> String {
    id.map_or_else(|| "null".to_string(), |id| format!("!{}", id))
}

/// Metadata string literal
fn quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\22"),
            '\\' => out.push_str("\\5C"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unit_and_file_come_first() {
        let info = DebugInfo::new("src/demo/main.bpl", "bplc");
        assert_eq!(info.main_file(), 0);
        assert_eq!(info.unit(), 1);
        let lines = info.finish();
        assert_eq!(lines[0], "!llvm.dbg.cu = !{!1}");
        assert_eq!(lines[1], "!llvm.module.flags = !{!2, !3}");
        assert_eq!(lines[2], "!0 = !DIFile(filename: \"main.bpl\", directory: \"src/demo\")");
        assert!(lines[3].starts_with("!1 = distinct !DICompileUnit(language: DW_LANG_C, file: !0, producer: \"bplc\""));
        assert_eq!(lines[4], "!2 = !{i32 2, !\"Debug Info Version\", i32 3}");
    }

    #[test]
    fn bare_file_name_uses_the_current_directory() {
        let lines = DebugInfo::new("main.bpl", "bplc").finish();
        assert_eq!(lines[2], "!0 = !DIFile(filename: \"main.bpl\", directory: \".\")");
    }

    #[test]
    fn types_and_locations_are_interned() {
        let mut info = DebugInfo::new("a.bpl", "bplc");
        let int = info.basic_type("int", 32, "DW_ATE_signed");
        assert_eq!(info.basic_type("int", 32, "DW_ATE_signed"), int);
        let ptr = info.pointer_type(Some(int));
        assert_eq!(info.pointer_type(Some(int)), ptr);
        let void_ptr = info.pointer_type(None);
        assert_ne!(void_ptr, ptr);

        let ty = info.subroutine_type(None, &[Some(ptr)]);
        let sp = info.subprogram("f", "f_i32_ptr", 3, ty, false);
        let loc = info.location(4, 5, sp);
        assert_eq!(info.location(4, 5, sp), loc);
        assert_ne!(info.location(5, 5, sp), loc);

        let lines = info.finish();
        let node = |id: u32| lines.iter().find(|l| l.starts_with(&format!("!{} = ", id))).unwrap().clone();
        assert_eq!(node(int), format!("!{} = !DIBasicType(name: \"int\", size: 32, encoding: DW_ATE_signed)", int));
        assert_eq!(
            node(ptr),
            format!("!{} = !DIDerivedType(tag: DW_TAG_pointer_type, baseType: !{}, size: 64)", ptr, int)
        );
        assert!(node(void_ptr).contains("baseType: null"));
        assert_eq!(node(ty), format!("!{} = !DISubroutineType(types: !{{null, !{}}})", ty, ptr));
        assert!(node(sp).contains("name: \"f\", linkageName: \"f_i32_ptr\""));
        assert!(node(sp).contains("line: 3, type: !"));
        assert!(node(sp).ends_with("spFlags: DISPFlagDefinition, unit: !1)"));
        assert_eq!(node(loc), format!("!{} = !DILocation(line: 4, column: 5, scope: !{})", loc, sp));
    }

    #[test]
    fn array_type_carries_a_subrange() {
        let mut info = DebugInfo::new("a.bpl", "bplc");
        let int = info.basic_type("int", 32, "DW_ATE_signed");
        let array = info.array_type(Some(int), 4);
        let lines = info.finish();
        assert!(lines.iter().any(|l| l.ends_with("= !DISubrange(count: 4)")));
        let node = lines.iter().find(|l| l.starts_with(&format!("!{} = ", array))).unwrap();
        assert!(node.contains(&format!("DW_TAG_array_type, baseType: !{}, elements: !", int)), "{}", node);
    }

    #[test]
    fn names_are_escaped() {
        assert_eq!(quoted("a\"b\\c"), "\"a\\22b\\5Cc\"");
    }
}
