//! Compile-time descriptors: field mappings, enum groups, and package
//! descriptors, plus the process-wide descriptor registry.
//!
//! Everything here is immutable after construction and freely shareable
//! across threads. Generated code builds these once per package from its
//! module-init function and registers the package into the registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use xxhash_rust::xxh3::Xxh3;

use crate::decode::{self, Decoder};
use crate::{Error, FieldType};

/// EnumWidth is the storage width of an enum group's values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnumWidth {
    U8,
    U16,
}

/// EnumGroup is a named set of small-integer constants with string labels.
#[derive(Debug)]
pub struct EnumGroup {
    name: String,
    width: EnumWidth,
    values: Vec<(String, u16)>,
    by_name: HashMap<String, u16>,
    by_number: HashMap<u16, usize>,
}

impl EnumGroup {
    pub fn new(
        name: &str,
        width: EnumWidth,
        values: Vec<(String, u16)>,
    ) -> Result<Arc<EnumGroup>, Error> {
        let mut by_name = HashMap::new();
        let mut by_number = HashMap::new();
        for (index, (label, number)) in values.iter().enumerate() {
            if width == EnumWidth::U8 && *number > u8::MAX as u16 {
                return Err(Error::InvalidMapping {
                    mapping: name.to_string(),
                    detail: format!("enum value {label:?} = {number} exceeds 8 bits"),
                });
            }
            if by_name.insert(label.clone(), *number).is_some() {
                return Err(Error::InvalidMapping {
                    mapping: name.to_string(),
                    detail: format!("duplicate enum label {label:?}"),
                });
            }
            if by_number.insert(*number, index).is_some() {
                return Err(Error::InvalidMapping {
                    mapping: name.to_string(),
                    detail: format!("duplicate enum value {number}"),
                });
            }
        }
        Ok(Arc::new(EnumGroup {
            name: name.to_string(),
            width,
            values,
            by_name,
            by_number,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> EnumWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn label(&self, number: u16) -> Option<&str> {
        self.by_number
            .get(&number)
            .map(|i| self.values[*i].0.as_str())
    }

    pub fn number(&self, label: &str) -> Option<u16> {
        self.by_name.get(label).copied()
    }

    /// Iterate (label, number) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.values.iter().map(|(l, n)| (l.as_str(), *n))
    }
}

/// NestedRef names the struct type of a struct or `[]struct` field at
/// mapping construction time.
#[derive(Clone)]
pub enum NestedRef {
    /// A previously-constructed mapping: another struct of this package, or
    /// one from an imported package.
    Mapping(Arc<Mapping>),
    /// The struct type being constructed refers to itself.
    SelfRef,
}

/// FieldSpec is the construction-time description of one field. Field
/// numbers are positional: the i'th spec becomes field number i.
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub enum_group: Option<Arc<EnumGroup>>,
    pub nested: Option<NestedRef>,
}

impl FieldSpec {
    pub fn scalar(name: &str, field_type: FieldType) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            field_type,
            enum_group: None,
            nested: None,
        }
    }

    pub fn enumerated(name: &str, field_type: FieldType, group: Arc<EnumGroup>) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            field_type,
            enum_group: Some(group),
            nested: None,
        }
    }

    pub fn nested(name: &str, field_type: FieldType, nested: NestedRef) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            field_type,
            enum_group: None,
            nested: Some(nested),
        }
    }
}

// A nested mapping reference is strong for cross-struct references and weak
// for self-references, which keeps the descriptor graph acyclic for Arc.
#[derive(Clone)]
enum NestedMapping {
    Strong(Arc<Mapping>),
    Cycle(Weak<Mapping>),
}

/// FieldDescr describes one field of a mapping.
pub struct FieldDescr {
    pub name: String,
    pub field_type: FieldType,
    pub field_num: u16,
    pub enum_group: Option<Arc<EnumGroup>>,
    nested: Option<NestedMapping>,
    nested_name: Option<String>,
    pub(crate) decoder: Decoder,
}

impl FieldDescr {
    /// The mapping of a struct or `[]struct` field.
    pub fn nested(&self) -> Option<Arc<Mapping>> {
        match &self.nested {
            Some(NestedMapping::Strong(m)) => Some(m.clone()),
            Some(NestedMapping::Cycle(w)) => w.upgrade(),
            None => None,
        }
    }

    /// The struct type name of a struct or `[]struct` field.
    pub fn nested_type_name(&self) -> Option<&str> {
        self.nested_name.as_deref()
    }
}

impl std::fmt::Debug for FieldDescr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescr")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("field_num", &self.field_num)
            .finish()
    }
}

/// Mapping is the immutable field table of one struct type.
///
/// Fields are dense and zero-based: `fields[i].field_num == i`.
pub struct Mapping {
    package: String,
    name: String,
    fields: Vec<FieldDescr>,
    by_name: HashMap<String, u16>,
}

impl Mapping {
    pub fn new(package: &str, name: &str, specs: Vec<FieldSpec>) -> Result<Arc<Mapping>, Error> {
        if specs.len() > u16::MAX as usize + 1 {
            return Err(Error::InvalidMapping {
                mapping: name.to_string(),
                detail: format!("{} fields exceed the 16-bit field number space", specs.len()),
            });
        }

        let mut by_name = HashMap::new();
        for (index, spec) in specs.iter().enumerate() {
            if by_name.insert(spec.name.clone(), index as u16).is_some() {
                return Err(Error::InvalidMapping {
                    mapping: name.to_string(),
                    detail: format!("duplicate field name {:?}", spec.name),
                });
            }
            match spec.field_type {
                FieldType::Map | FieldType::Any => {
                    return Err(Error::InvalidMapping {
                        mapping: name.to_string(),
                        detail: format!(
                            "field {:?} uses reserved type {:?}",
                            spec.name, spec.field_type
                        ),
                    });
                }
                FieldType::Struct | FieldType::ListStructs => {
                    if spec.nested.is_none() {
                        return Err(Error::InvalidMapping {
                            mapping: name.to_string(),
                            detail: format!("field {:?} has no nested struct type", spec.name),
                        });
                    }
                }
                _ => {
                    if spec.nested.is_some() {
                        return Err(Error::InvalidMapping {
                            mapping: name.to_string(),
                            detail: format!(
                                "field {:?} of type {:?} cannot name a nested struct",
                                spec.name, spec.field_type
                            ),
                        });
                    }
                }
            }
            if let Some(group) = &spec.enum_group {
                let ok = match group.width() {
                    EnumWidth::U8 => matches!(
                        spec.field_type,
                        FieldType::Uint8 | FieldType::ListUint8
                    ),
                    EnumWidth::U16 => matches!(
                        spec.field_type,
                        FieldType::Uint16 | FieldType::ListUint16
                    ),
                };
                if !ok {
                    return Err(Error::InvalidMapping {
                        mapping: name.to_string(),
                        detail: format!(
                            "field {:?} of type {:?} cannot use enum group {:?}",
                            spec.name,
                            spec.field_type,
                            group.name()
                        ),
                    });
                }
            }
        }

        // Validation is complete: construction below is infallible, which
        // lets self-references tie back through new_cyclic.
        Ok(Arc::new_cyclic(|weak: &Weak<Mapping>| {
            let fields = specs
                .into_iter()
                .enumerate()
                .map(|(index, spec)| FieldDescr {
                    decoder: decode::decoder_for(spec.field_type),
                    nested_name: spec.nested.as_ref().map(|n| match n {
                        NestedRef::Mapping(m) => m.name().to_string(),
                        NestedRef::SelfRef => name.to_string(),
                    }),
                    nested: spec.nested.map(|n| match n {
                        NestedRef::Mapping(m) => NestedMapping::Strong(m),
                        NestedRef::SelfRef => NestedMapping::Cycle(weak.clone()),
                    }),
                    name: spec.name,
                    field_type: spec.field_type,
                    field_num: index as u16,
                    enum_group: spec.enum_group,
                })
                .collect();
            Mapping {
                package: package.to_string(),
                name: name.to_string(),
                fields,
                by_name,
            }
        }))
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn by_num(&self, field_num: u16) -> Option<&FieldDescr> {
        self.fields.get(field_num as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldDescr> {
        self.by_name.get(name).map(|i| &self.fields[*i as usize])
    }

    /// Iterate fields in ascending field number order.
    pub fn fields(&self) -> std::slice::Iter<'_, FieldDescr> {
        self.fields.iter()
    }

    fn fingerprint_into(&self, h: &mut Xxh3) {
        h.update(self.name.as_bytes());
        for d in &self.fields {
            h.update(d.name.as_bytes());
            h.update(&[d.field_type as u8]);
            h.update(&d.field_num.to_le_bytes());
            if let Some(group) = &d.enum_group {
                h.update(group.name().as_bytes());
            }
            if let Some(nested) = d.nested() {
                h.update(nested.name().as_bytes());
            }
        }
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("package", &self.package)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Package is the full descriptor of one compiled claw package.
#[derive(Debug)]
pub struct Package {
    path: String,
    name: String,
    imports: Vec<String>,
    enums: Vec<Arc<EnumGroup>>,
    structs: Vec<Arc<Mapping>>,
    fingerprint: u64,
}

impl Package {
    pub fn new(
        path: &str,
        name: &str,
        imports: Vec<String>,
        enums: Vec<Arc<EnumGroup>>,
        structs: Vec<Arc<Mapping>>,
    ) -> Arc<Package> {
        let mut h = Xxh3::new();
        h.update(path.as_bytes());
        h.update(name.as_bytes());
        for import in &imports {
            h.update(import.as_bytes());
        }
        for group in &enums {
            h.update(group.name().as_bytes());
            h.update(&[group.width() as u8]);
            for (label, number) in group.iter() {
                h.update(label.as_bytes());
                h.update(&number.to_le_bytes());
            }
        }
        for mapping in &structs {
            mapping.fingerprint_into(&mut h);
        }
        Arc::new(Package {
            path: path.to_string(),
            name: name.to_string(),
            imports,
            enums,
            structs,
            fingerprint: h.digest(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Iterate struct mappings in declaration order. The iterator is a
    /// plain restartable slice iterator.
    pub fn structs(&self) -> std::slice::Iter<'_, Arc<Mapping>> {
        self.structs.iter()
    }

    pub fn enums(&self) -> std::slice::Iter<'_, Arc<EnumGroup>> {
        self.enums.iter()
    }

    pub fn struct_by_name(&self, name: &str) -> Option<&Arc<Mapping>> {
        self.structs.iter().find(|m| m.name() == name)
    }

    pub fn enum_by_name(&self, name: &str) -> Option<&Arc<EnumGroup>> {
        self.enums.iter().find(|g| g.name() == name)
    }
}

/// The process-wide package registry.
///
/// Generated code registers its package once from module init; reflection
/// and the format bridges consult the registry by import path.
pub mod registry {
    use super::Package;
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    lazy_static::lazy_static! {
        static ref REGISTRY: RwLock<HashMap<String, Arc<Package>>> = RwLock::new(HashMap::new());
    }

    /// Register a package descriptor. Registration is idempotent per path:
    /// re-registering an identical descriptor is a no-op, while a different
    /// descriptor under the same path is an error.
    pub fn register(pkg: Arc<Package>) -> Result<(), Error> {
        let mut registry = REGISTRY.write().unwrap();
        if let Some(existing) = registry.get(pkg.path()) {
            if existing.fingerprint() == pkg.fingerprint() {
                return Ok(());
            }
            tracing::warn!(path = pkg.path(), "conflicting package registration");
            return Err(Error::DescriptorConflict {
                path: pkg.path().to_string(),
            });
        }
        tracing::debug!(path = pkg.path(), name = pkg.name(), "registered package");
        registry.insert(pkg.path().to_string(), pkg);
        Ok(())
    }

    pub fn lookup(path: &str) -> Option<Arc<Package>> {
        REGISTRY.read().unwrap().get(path).cloned()
    }

    /// A point-in-time snapshot of all registered packages.
    pub fn packages() -> Vec<Arc<Package>> {
        REGISTRY.read().unwrap().values().cloned().collect()
    }
}
