//! The resolved-IDL surface.
//!
//! The external `.claw` parser hands the compiler a [File] value per
//! schema file: package identity, imports, enum groups, and struct
//! definitions. This crate owns the validity rules the parser must have
//! enforced, and the single entry point which lowers a validated File into
//! runtime descriptors for the code generator and reflection:
//! [File::compile].
//!
//! Parsing `.claw` text, fetching remote schemas, and rendering generated
//! bindings all live outside this crate.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use claw::mapping::{EnumGroup, EnumWidth, FieldSpec, Mapping, NestedRef, Package};
use claw::FieldType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "struct {strukt:?}: field {field:?} has number {field_num} but sits at position {index}; \
         field numbers are dense from 0"
    )]
    NonDenseField {
        strukt: String,
        field: String,
        field_num: u16,
        index: usize,
    },

    #[error("duplicate name {name:?}")]
    DuplicateName { name: String },

    #[error("struct {strukt:?}: field {field:?} has unknown type {type_name:?}")]
    UnknownTypeName {
        strukt: String,
        field: String,
        type_name: String,
    },

    #[error("struct {strukt:?}: field {field:?} of type {type_name:?} requires a type ident")]
    MissingIdent {
        strukt: String,
        field: String,
        type_name: String,
    },

    #[error("struct {strukt:?}: field {field:?} references {ident:?}, which is not resolvable")]
    UnresolvedReference {
        strukt: String,
        field: String,
        ident: String,
    },

    #[error("enum {name:?} has unsupported size {size}; claw enums are 8 or 16 bits")]
    BadEnumSize { name: String, size: u8 },

    #[error(transparent)]
    Claw(#[from] claw::Error),
}

/// File is one resolved `.claw` schema file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// The package import path, e.g. "github.com/acme/vehicles/claw".
    pub package: String,
    /// The package short name used by generated code.
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub path: String,
    /// The local alias fields reference the import by.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    /// Storage width in bits: 8 or 16.
    pub size: u8,
    pub values: Vec<EnumValueDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValueDef {
    pub name: String,
    pub number: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// The IDL type spelling: "uint8", "string", "[]bool", "struct",
    /// "[]struct", and so on.
    pub type_name: String,
    pub field_num: u16,
    /// For enum-typed fields, the enum group name. For struct and
    /// `[]struct` fields, the struct type name, optionally qualified with
    /// an import alias ("alias.Name").
    #[serde(default)]
    pub ident: Option<String>,
}

impl File {
    /// Check the rules the external parser must enforce before handing a
    /// File over: field numbers dense from 0, names unique per file, and
    /// local cross-references resolvable. A struct field may reference an
    /// enum, a struct defined earlier in the file, itself, or an imported
    /// type; mutual recursion between two structs is not expressible.
    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for e in &self.enums {
            if !names.insert(e.name.as_str()) {
                return Err(Error::DuplicateName {
                    name: e.name.clone(),
                });
            }
            if e.size != 8 && e.size != 16 {
                return Err(Error::BadEnumSize {
                    name: e.name.clone(),
                    size: e.size,
                });
            }
        }

        let mut seen_structs = HashSet::new();
        for s in &self.structs {
            if !names.insert(s.name.as_str()) {
                return Err(Error::DuplicateName {
                    name: s.name.clone(),
                });
            }

            let mut field_names = HashSet::new();
            for (index, f) in s.fields.iter().enumerate() {
                if f.field_num as usize != index {
                    return Err(Error::NonDenseField {
                        strukt: s.name.clone(),
                        field: f.name.clone(),
                        field_num: f.field_num,
                        index,
                    });
                }
                if !field_names.insert(f.name.as_str()) {
                    return Err(Error::DuplicateName {
                        name: format!("{}.{}", s.name, f.name),
                    });
                }

                let Some(ft) = FieldType::from_name(&f.type_name) else {
                    return Err(Error::UnknownTypeName {
                        strukt: s.name.clone(),
                        field: f.name.clone(),
                        type_name: f.type_name.clone(),
                    });
                };
                if matches!(ft, FieldType::Struct | FieldType::ListStructs) {
                    let Some(ident) = &f.ident else {
                        return Err(Error::MissingIdent {
                            strukt: s.name.clone(),
                            field: f.name.clone(),
                            type_name: f.type_name.clone(),
                        });
                    };
                    // Imported references are resolved at compile time
                    // against the provided dependency set.
                    let local = !ident.contains('.');
                    if local && *ident != s.name && !seen_structs.contains(ident.as_str()) {
                        return Err(Error::UnresolvedReference {
                            strukt: s.name.clone(),
                            field: f.name.clone(),
                            ident: ident.clone(),
                        });
                    }
                } else if let Some(ident) = &f.ident {
                    let local = !ident.contains('.');
                    if local && !self.enums.iter().any(|e| e.name == *ident) {
                        return Err(Error::UnresolvedReference {
                            strukt: s.name.clone(),
                            field: f.name.clone(),
                            ident: ident.clone(),
                        });
                    }
                }
            }
            seen_structs.insert(s.name.as_str());
        }
        Ok(())
    }

    /// Lower a validated File into a runtime package descriptor. `deps`
    /// holds the compiled packages of this file's imports. This is the
    /// entry point the code generator consumes; registering the result
    /// into the process registry is the caller's (generated code's) move.
    pub fn compile(&self, deps: &[Arc<Package>]) -> Result<Arc<Package>, Error> {
        self.validate()?;

        let resolve_dep = |ident: &str| -> Option<&Arc<Package>> {
            let (alias, _) = ident.split_once('.')?;
            let import = self.imports.iter().find(|i| i.name == alias)?;
            deps.iter().find(|p| p.path() == import.path)
        };

        let mut enums = Vec::new();
        for e in &self.enums {
            let width = if e.size == 8 {
                EnumWidth::U8
            } else {
                EnumWidth::U16
            };
            let values = e
                .values
                .iter()
                .map(|v| (v.name.clone(), v.number))
                .collect();
            enums.push(EnumGroup::new(&e.name, width, values)?);
        }

        let find_enum = |strukt: &StructDef, f: &FieldDef, ident: &str| {
            let group = if ident.contains('.') {
                resolve_dep(ident)
                    .and_then(|p| p.enum_by_name(ident.split_once('.').unwrap().1))
                    .cloned()
            } else {
                enums.iter().find(|g| g.name() == ident).cloned()
            };
            group.ok_or_else(|| Error::UnresolvedReference {
                strukt: strukt.name.clone(),
                field: f.name.clone(),
                ident: ident.to_string(),
            })
        };

        let mut structs: Vec<Arc<Mapping>> = Vec::new();
        for s in &self.structs {
            let mut specs = Vec::new();
            for f in &s.fields {
                let ft = FieldType::from_name(&f.type_name).expect("validated type name");
                let spec = match ft {
                    FieldType::Struct | FieldType::ListStructs => {
                        let ident = f.ident.as_ref().expect("validated ident");
                        let nested = if *ident == s.name {
                            NestedRef::SelfRef
                        } else if let Some(m) =
                            structs.iter().find(|m| m.name() == *ident).cloned()
                        {
                            NestedRef::Mapping(m)
                        } else if let Some(m) = resolve_dep(ident)
                            .and_then(|p| p.struct_by_name(ident.split_once('.').unwrap().1))
                            .cloned()
                        {
                            NestedRef::Mapping(m)
                        } else {
                            return Err(Error::UnresolvedReference {
                                strukt: s.name.clone(),
                                field: f.name.clone(),
                                ident: ident.clone(),
                            });
                        };
                        FieldSpec::nested(&f.name, ft, nested)
                    }
                    _ => match &f.ident {
                        Some(ident) => FieldSpec::enumerated(&f.name, ft, find_enum(s, f, ident)?),
                        None => FieldSpec::scalar(&f.name, ft),
                    },
                };
                specs.push(spec);
            }
            structs.push(Mapping::new(&self.package, &s.name, specs)?);
        }

        let imports = self.imports.iter().map(|i| i.path.clone()).collect();
        let pkg = Package::new(&self.package, &self.name, imports, enums, structs);
        tracing::debug!(
            path = pkg.path(),
            structs = pkg.structs().len(),
            enums = pkg.enums().len(),
            "compiled package descriptor"
        );
        Ok(pkg)
    }
}

#[cfg(test)]
mod test {
    use super::{EnumDef, EnumValueDef, Error, FieldDef, File, Import, StructDef};
    use claw::Struct;
    use pretty_assertions::assert_eq;

    fn field(name: &str, type_name: &str, field_num: u16, ident: Option<&str>) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            type_name: type_name.to_string(),
            field_num,
            ident: ident.map(str::to_string),
        }
    }

    fn vehicles_file() -> File {
        File {
            package: "acme/vehicles/claw".to_string(),
            name: "vehicles".to_string(),
            version: 1,
            imports: vec![],
            enums: vec![EnumDef {
                name: "Manufacturer".to_string(),
                size: 8,
                values: vec![
                    EnumValueDef {
                        name: "Unknown".to_string(),
                        number: 0,
                    },
                    EnumValueDef {
                        name: "Toyota".to_string(),
                        number: 1,
                    },
                ],
            }],
            structs: vec![
                StructDef {
                    name: "Car".to_string(),
                    fields: vec![
                        field("Manufacturer", "uint8", 0, Some("Manufacturer")),
                        field("Year", "uint16", 1, None),
                    ],
                },
                StructDef {
                    name: "Garage".to_string(),
                    fields: vec![
                        field("Name", "string", 0, None),
                        field("Cars", "[]struct", 1, Some("Car")),
                        field("Next", "struct", 2, Some("Garage")),
                    ],
                },
            ],
        }
    }

    #[test]
    fn test_validate_and_compile() {
        let file = vehicles_file();
        file.validate().unwrap();

        let pkg = file.compile(&[]).unwrap();
        assert_eq!(pkg.path(), "acme/vehicles/claw");
        assert_eq!(pkg.structs().len(), 2);

        // The compiled mappings drive a working runtime Struct.
        let car = pkg.struct_by_name("Car").unwrap().clone();
        let mut s = Struct::new(car.clone());
        s.set::<u8>(0, 1).unwrap();
        s.set::<u16>(1, 2010).unwrap();
        let reread = Struct::unmarshal(car, s.to_vec().unwrap()).unwrap();
        assert_eq!(reread, s);

        // Self-reference ties back to the same mapping.
        let garage = pkg.struct_by_name("Garage").unwrap();
        let next = garage.by_name("Next").unwrap().nested().unwrap();
        assert_eq!(next.name(), "Garage");
    }

    #[test]
    fn test_serde_round_trip() {
        let file = vehicles_file();
        let json = serde_json::to_string(&file).unwrap();
        let reread: File = serde_json::from_str(&json).unwrap();
        assert_eq!(reread, file);
    }

    #[test]
    fn test_non_dense_fields() {
        let mut file = vehicles_file();
        file.structs[0].fields[1].field_num = 2;
        assert!(matches!(
            file.validate(),
            Err(Error::NonDenseField { field_num: 2, .. }),
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let mut file = vehicles_file();
        file.structs[1].name = "Car".to_string();
        assert!(matches!(file.validate(), Err(Error::DuplicateName { .. })));

        let mut file = vehicles_file();
        file.structs[0].fields[1].type_name = "uint12".to_string();
        assert!(matches!(file.validate(), Err(Error::UnknownTypeName { .. })));
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        // Garage is defined after Car; a Car field cannot reference it.
        let mut file = vehicles_file();
        file.structs[0]
            .fields
            .push(field("Home", "struct", 2, Some("Garage")));
        assert!(matches!(
            file.validate(),
            Err(Error::UnresolvedReference { .. }),
        ));
    }

    #[test]
    fn test_imported_references() {
        let dep = vehicles_file().compile(&[]).unwrap();

        let file = File {
            package: "acme/fleet/claw".to_string(),
            name: "fleet".to_string(),
            version: 1,
            imports: vec![Import {
                path: "acme/vehicles/claw".to_string(),
                name: "vehicles".to_string(),
            }],
            enums: vec![],
            structs: vec![StructDef {
                name: "Fleet".to_string(),
                fields: vec![
                    field("Flagship", "struct", 0, Some("vehicles.Car")),
                    field("Make", "uint8", 1, Some("vehicles.Manufacturer")),
                ],
            }],
        };
        file.validate().unwrap();

        let pkg = file.compile(&[dep]).unwrap();
        let fleet = pkg.struct_by_name("Fleet").unwrap();
        assert_eq!(fleet.by_name("Flagship").unwrap().nested().unwrap().name(), "Car");

        // Without the dependency the same file does not compile.
        assert!(matches!(
            file.compile(&[]),
            Err(Error::UnresolvedReference { .. }),
        ));
    }
}
