
use crate::config::LayoutConfig;
use crate::dex::{
    AnnotationItem, AnnotationSet, AnnotationsDirectory, ClassData, ClassId, Code, DexLayout, EncodedAnnotation,
    EncodedArrayItem, EncodedField, EncodedMethod, EncodedValue, FieldKey, MethodKey, ProtoKey, VISIBILITY_RUNTIME,
};

pub(crate) const GREETER: &str = "Lcom/example/Greeter;";

/// A one-class file touching most section types: a class implementing `Runnable` with a
/// static field, a static value, a class annotation and a method whose code loads a
/// string and calls `println`.
pub(crate) fn sample_dex() -> DexLayout {
    let mut dex = unsettled_sample_dex(LayoutConfig::default());
    dex.refresh_full().expect("sample layout settles");
    dex
}

/// [`sample_dex`] before any layout pass: every offset is still zero.
pub(crate) fn unsettled_sample_dex(config: LayoutConfig) -> DexLayout {
    let mut dex = DexLayout::with_config(config);
    let list = dex.sections_mut();

    let class = list.get_or_create_class(GREETER);
    let interfaces = list.get_or_create_type_list(&["Ljava/lang/Runnable;".to_string()]);
    let source_file = list.get_or_create_string("Greeter.java");
    let hello = list.get_or_create_string("hello");
    let println = list.get_or_create_method(&"Ljava/io/PrintStream;->println(Ljava/lang/String;)V".parse().unwrap());
    let run = list.get_or_create_method(&MethodKey::new(GREETER, "run", ProtoKey::new("V", &[])));
    let greeting = list.get_or_create_field(&FieldKey::new(GREETER, "GREETING", "Ljava/lang/String;"));
    let deprecated = list.get_or_create_type("Ljava/lang/Deprecated;");

    // const-string v0, "hello"; invoke-virtual {v1, v0}, println; return-void
    let mut code = Code::new(2, 1, 2, vec![0x001a, 0x0000, 0x206e, 0x0000, 0x0001, 0x000e]);
    code.instruction_refs_mut()[0].item = hello.into();
    code.instruction_refs_mut()[1].item = println.into();
    let code = list.get_or_create_section::<Code>().add(code);

    let class_data = list.get_or_create_section::<ClassData>().add(ClassData {
        static_fields: vec![EncodedField { field: greeting.into(), access_flags: 0x19 }],
        virtual_methods: vec![EncodedMethod { method: run.into(), access_flags: 0x1, code: code.into() }],
        ..Default::default()
    });
    let static_values = list
        .get_or_create_section::<EncodedArrayItem>()
        .add(EncodedArrayItem { values: vec![EncodedValue::String(hello.into())] });
    let annotation = list.get_or_create_section::<AnnotationItem>().add(AnnotationItem {
        visibility: VISIBILITY_RUNTIME,
        annotation: EncodedAnnotation { type_ref: deprecated.into(), elements: vec![] },
    });
    let set = list.get_or_create_section::<AnnotationSet>().add(AnnotationSet { entries: vec![annotation.into()] });
    let directory = list
        .get_or_create_section::<AnnotationsDirectory>()
        .add(AnnotationsDirectory { class_annotations: set.into(), ..Default::default() });

    let def = list.section_mut::<ClassId>().unwrap().item_mut(class).unwrap();
    def.interfaces = interfaces.into();
    def.source_file = source_file.into();
    def.annotations = directory.into();
    def.class_data = class_data.into();
    def.static_values = static_values.into();

    list.sort_strings();
    dex
}

/// Index of the string `text` in the string id section.
pub(crate) fn string_index(dex: &DexLayout, text: &str) -> Option<usize> {
    let list = dex.sections();
    let handle = list.get(&crate::dex::Key::String(text.to_string()))?;
    list.location_of(handle).map(|(index, _)| index)
}
