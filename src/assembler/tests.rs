use super::{assemble_text, AssembleOptions, AssembleResult};
use crate::core::debuginfo::ByteRole;
use crate::core::diag::Severity;
use crate::core::source::MapLoader;
use crate::mos6502::disasm::{disassemble, DisasmOptions};

fn assemble(source: &str) -> AssembleResult {
    assemble_with_loader(source, &MapLoader::new())
}

fn assemble_with_loader(source: &str, loader: &MapLoader) -> AssembleResult {
    assemble_text("main.asm", source, loader, &AssembleOptions::default())
}

/// Assemble and return the full program (load-address prefix included),
/// asserting no errors.
fn assemble_program(source: &str) -> Vec<u8> {
    let result = assemble(source);
    assert_eq!(
        result.error_count(),
        0,
        "assembly failed: {:?}",
        result.formatted_diagnostics()
    );
    result.program
}

/// Assemble and return the image without the load-address prefix.
fn assemble_body(source: &str) -> Vec<u8> {
    assemble_program(source)[2..].to_vec()
}

fn assemble_errors(source: &str) -> Vec<String> {
    let result = assemble(source);
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.format(&result.sources))
        .collect()
}

// ---- end-to-end scenarios -------------------------------------------

#[test]
fn hello_assembles_to_expected_bytes() {
    let program = assemble_program("* = $0801\n lda #$41\n sta $d020\n rts\n");
    assert_eq!(
        program,
        vec![0x01, 0x08, 0xA9, 0x41, 0x8D, 0x20, 0xD0, 0x60]
    );
}

#[test]
fn backward_branch_emits_signed_offset() {
    let body = assemble_body("* = $0801\nloop: dex\n bne loop\n");
    assert_eq!(body, vec![0xCA, 0xD0, 0xFD]);
}

#[test]
fn zero_page_equate_narrows_to_two_bytes() {
    let body = assemble_body("* = $0801\nzp = $10\n lda zp\n");
    assert_eq!(body, vec![0xA5, 0x10]);
}

#[test]
fn out_of_range_branch_is_a_single_range_error() {
    let errors = assemble_errors("* = $0801\n bne target\n !fill 200, 0\ntarget: rts\n");
    assert_eq!(errors.len(), 1, "errors: {errors:?}");
    assert!(errors[0].contains("out of range"), "error: {}", errors[0]);
    assert!(errors[0].starts_with("main.asm:2:"), "error: {}", errors[0]);
}

#[test]
fn macro_invocations_get_distinct_labels() {
    let source = "* = $0801\n!macro spin() {\nloop: dex\n bne loop\n}\n+spin()\n+spin()\n";
    let result = assemble(source);
    assert_eq!(
        result.error_count(),
        0,
        "diagnostics: {:?}",
        result.formatted_diagnostics()
    );
    // each call branches to its own copy
    assert_eq!(
        result.program[2..].to_vec(),
        vec![0xCA, 0xD0, 0xFD, 0xCA, 0xD0, 0xFD]
    );
    let loops: Vec<_> = result
        .debug_info
        .labels()
        .iter()
        .filter(|l| l.name == "loop")
        .collect();
    assert_eq!(loops.len(), 2);
    assert_ne!(loops[0].scope_path, loops[1].scope_path);
    assert!(loops[0].scope_path.iter().any(|s| s.starts_with("spin@")));
}

#[test]
fn binary_include_respects_size_and_offset() {
    let mut loader = MapLoader::new();
    loader.add_binary("blob.bin", (0u8..10).collect());
    let result = assemble_with_loader("* = $0801\n!binary \"blob.bin\", 4, 2\n", &loader);
    assert_eq!(result.error_count(), 0);
    assert_eq!(result.program[2..].to_vec(), vec![2, 3, 4, 5]);
}

// ---- program format -------------------------------------------------

#[test]
fn default_origin_emits_basic_stub() {
    let program = assemble_program(" lda #$00\n rts\n");
    assert_eq!(&program[..2], &[0x01, 0x08]);
    // 10 SYS 2061
    assert_eq!(
        &program[2..14],
        &[0x0b, 0x08, 0x0a, 0x00, 0x9e, 0x32, 0x30, 0x36, 0x31, 0x00, 0x00, 0x00]
    );
    // first user instruction right after the stub, at $080d = 2061
    assert_eq!(program[14], 0xA9);
}

#[test]
fn stub_code_branches_relative_to_real_address() {
    let result = assemble("loop: dex\n bne loop\n");
    assert_eq!(result.error_count(), 0);
    let body = &result.program[2..];
    assert_eq!(&body[12..], &[0xCA, 0xD0, 0xFD]);
    let loop_label = result
        .debug_info
        .labels()
        .iter()
        .find(|l| l.name == "loop")
        .expect("loop label");
    assert_eq!(loop_label.addr, 0x080d);
}

#[test]
fn segments_concatenate_in_declaration_order() {
    let source = "* = $0801\n lda #1\n!segment data\n* = $2000\n!byte 7, 8\n!segment default\n rts\n";
    let body = assemble_body(source);
    assert_eq!(body, vec![0xA9, 0x01, 0x60, 7, 8]);
}

#[test]
fn load_address_follows_set_pc() {
    let result = assemble("* = $c000\n rts\n");
    assert_eq!(result.load_address, 0xc000);
    assert_eq!(result.program, vec![0x00, 0xc0, 0x60]);
}

// ---- fixpoint behavior ----------------------------------------------

#[test]
fn forward_reference_resolves_to_absolute() {
    let body = assemble_body("* = $0801\n lda data\n rts\ndata: !byte 5\n");
    assert_eq!(body, vec![0xAD, 0x05, 0x08, 0x60, 0x05]);
}

#[test]
fn forward_reference_in_zero_page_narrows() {
    // The first pass encodes wide, later passes settle on zero page.
    let body = assemble_body("* = $10\n lda data\ndata: !byte 9\n");
    assert_eq!(body, vec![0xA5, 0x12, 0x09]);
}

#[test]
fn forward_constant_reference_converges() {
    let body = assemble_body("* = $0801\n lda #value\nvalue = $41\n");
    assert_eq!(body, vec![0xA9, 0x41]);
}

#[test]
fn oscillating_source_reports_no_convergence() {
    let source = "!if x < $0810 {\n !fill 32, 0\n}\nx: rts\n";
    let result = assemble(source);
    assert!(result
        .formatted_diagnostics()
        .iter()
        .any(|d| d.contains("did not converge")));
}

#[test]
fn assembly_is_idempotent() {
    let source = "* = $0801\nstart: ldx #8\nloop: dex\n bne loop\n jmp start\n";
    let first = assemble(source);
    let second = assemble(source);
    assert_eq!(first.program, second.program);
    assert_eq!(
        first.formatted_diagnostics(),
        second.formatted_diagnostics()
    );
}

// ---- conditionals, loops, macros ------------------------------------

#[test]
fn if_takes_only_the_selected_branch() {
    let body = assemble_body("* = $0801\n!let debug = 0\n!if debug {\n brk\n} else {\n rts\n}\n");
    assert_eq!(body, vec![0x60]);
}

#[test]
fn if_condition_unresolved_in_final_pass_is_an_error() {
    let errors = assemble_errors("!if undefined_flag {\n nop\n}\n");
    assert!(errors.iter().any(|e| e.contains("Undefined symbol")));
}

#[test]
fn for_loop_unrolls_in_source_order() {
    let body = assemble_body("* = $0801\n!for i in range(4) {\n !byte i * 2\n}\n");
    assert_eq!(body, vec![0, 2, 4, 6]);
}

#[test]
fn for_loop_over_start_end_range() {
    let body = assemble_body("* = $0801\n!for i in range(2, 5) {\n !byte i\n}\n");
    assert_eq!(body, vec![2, 3, 4]);
}

#[test]
fn for_loop_requires_an_array() {
    let errors = assemble_errors("!for i in 4 {\n !byte i\n}\n");
    assert!(errors.iter().any(|e| e.contains("!for expects an array")));
}

#[test]
fn macro_arguments_bind_by_position() {
    let source =
        "* = $0801\n!macro store(value, addr) {\n lda #value\n sta addr\n}\n+store($41, $d020)\n";
    let body = assemble_body(source);
    assert_eq!(body, vec![0xA9, 0x41, 0x8D, 0x20, 0xD0]);
}

#[test]
fn macro_argument_count_is_checked() {
    let errors = assemble_errors("!macro two(a, b) {\n !byte a, b\n}\n+two(1)\n");
    assert!(errors.iter().any(|e| e.contains("expects 2 argument(s)")));
}

#[test]
fn macro_body_sees_definition_scope() {
    // `base` is resolved where the macro was defined, not at the call site
    let source = "* = $0801\n!scope lib {\nbase = $40\n!macro emit() {\n !byte base\n}\n}\n!scope user {\nbase = $99\n+lib::emit()\n}\n";
    let body = assemble_body(source);
    assert_eq!(body, vec![0x40]);
}

#[test]
fn recursive_macro_hits_depth_cap() {
    let errors = assemble_errors("!macro deep() {\n+deep()\n}\n+deep()\n");
    assert!(errors.iter().any(|e| e.contains("maximum depth")));
}

// ---- scopes and symbols ---------------------------------------------

#[test]
fn qualified_lookup_reaches_into_scopes() {
    let source = "* = $0801\n jsr irq::handler\n rts\n!scope irq {\nhandler: rti\n}\n";
    let body = assemble_body(source);
    assert_eq!(body, vec![0x20, 0x05, 0x08, 0x60, 0x40]);
}

#[test]
fn local_labels_are_scope_private() {
    let source = "* = $0801\n!scope a {\n@w: dex\n bne @w\n}\n!scope b {\n@w: iny\n bne @w\n}\n";
    let body = assemble_body(source);
    assert_eq!(body, vec![0xCA, 0xD0, 0xFD, 0xC8, 0xD0, 0xFD]);
}

#[test]
fn duplicate_label_is_reported() {
    let errors = assemble_errors("x: nop\nx: nop\n");
    assert!(errors.iter().any(|e| e.contains("Duplicate label: x")));
}

#[test]
fn label_shadowing_builtin_warns_without_failing() {
    let result = assemble("* = $0801\nlo: nop\n");
    assert_eq!(result.error_count(), 0);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("shadows built-in")));
}

#[test]
fn predefined_constants_from_options() {
    let loader = MapLoader::new();
    let options = AssembleOptions {
        defines: vec![("debug".to_string(), 1)],
        ..AssembleOptions::default()
    };
    let result = assemble_text(
        "main.asm",
        "* = $0801\n!if debug {\n rts\n}\n",
        &loader,
        &options,
    );
    assert_eq!(result.error_count(), 0);
    assert_eq!(result.program[2..].to_vec(), vec![0x60]);
}

// ---- data directives ------------------------------------------------

#[test]
fn word_directive_emits_little_endian() {
    let body = assemble_body("* = $0801\n!word $1234, 513\n");
    assert_eq!(body, vec![0x34, 0x12, 0x01, 0x02]);
}

#[test]
fn byte_strings_and_arrays_flatten() {
    let body = assemble_body("* = $0801\n!byte \"AB\", 3, byte_array(\"C\")\n");
    assert_eq!(body, vec![0x41, 0x42, 3, 0x43]);
}

#[test]
fn byte_range_is_checked() {
    let errors = assemble_errors("!byte 256\n");
    assert!(errors.iter().any(|e| e.contains("out of range")));
    let errors = assemble_errors("!word 65536\n");
    assert!(errors.iter().any(|e| e.contains("out of range")));
}

#[test]
fn fill_defaults_to_zero() {
    let body = assemble_body("* = $0801\n!fill 3\n");
    assert_eq!(body, vec![0, 0, 0]);
    let errors = assemble_errors("!fill 0 - 1\n");
    assert!(errors.iter().any(|e| e.contains("Negative fill count")));
}

#[test]
fn text_converts_to_petscii() {
    let body = assemble_body("* = $0801\n!text \"abc\"\n");
    assert_eq!(body, vec![0x41, 0x42, 0x43]);
}

#[test]
fn align_pads_to_boundary() {
    let body = assemble_body("* = $0801\n nop\n!align 4\n!byte 9\n");
    assert_eq!(body, vec![0xEA, 0, 0, 9]);
}

#[test]
fn include_inlines_statements() {
    let mut loader = MapLoader::new();
    loader.add_text("lib.asm", "shared: lda #1\n rts\n");
    let result = assemble_with_loader("* = $0801\n jsr shared\n!include \"lib.asm\"\n", &loader);
    assert_eq!(result.error_count(), 0);
    assert_eq!(
        result.program[2..].to_vec(),
        vec![0x20, 0x04, 0x08, 0xA9, 0x01, 0x60]
    );
}

#[test]
fn diagnostics_from_included_files_name_that_file() {
    let mut loader = MapLoader::new();
    loader.add_text("lib.asm", " lda #nope\n");
    let result = assemble_with_loader("!include \"lib.asm\"\n", &loader);
    assert!(result
        .formatted_diagnostics()
        .iter()
        .any(|d| d.starts_with("lib.asm:1:")));
}

#[test]
fn missing_binary_file_is_a_resource_error() {
    let errors = assemble_errors("!binary \"absent.bin\"\n");
    assert!(errors.iter().any(|e| e.contains("absent.bin")));
    let mut loader = MapLoader::new();
    loader.add_binary("blob.bin", vec![0; 4]);
    let result = assemble_with_loader("!binary \"blob.bin\", 4, 2\n", &loader);
    assert!(result
        .formatted_diagnostics()
        .iter()
        .any(|d| d.contains("range exceeds file")));
}

// ---- diagnostics ----------------------------------------------------

#[test]
fn diagnostic_format_is_stable() {
    let errors = assemble_errors("lda #zz\n");
    assert_eq!(errors, vec!["main.asm:1:6 - error: Undefined symbol: zz"]);
}

#[test]
fn syntax_errors_carry_prefix_and_parser_recovers() {
    let result = assemble("!word )\n lda #1\n!bogus\n");
    let formatted = result.formatted_diagnostics();
    assert_eq!(result.error_count(), 2);
    assert!(formatted[0].contains("error: Syntax error: "));
}

#[test]
fn diagnostics_are_ordered_by_position() {
    let errors = assemble_errors(" nop\n!byte 999\n!byte 777\n");
    assert!(errors[0].contains(":2:"));
    assert!(errors[1].contains(":3:"));
}

#[test]
fn user_error_and_warning_directives() {
    let result = assemble("!warning \"check timing\"\n!error \"unsupported build\"\n");
    assert_eq!(result.error_count(), 1);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message == "check timing"));
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error && d.message == "unsupported build"));
}

#[test]
fn unknown_mnemonic_is_reported() {
    let errors = assemble_errors(" mvn $10\n");
    assert!(errors.iter().any(|e| e.contains("Unknown mnemonic")));
}

#[test]
fn division_by_zero_is_reported() {
    let errors = assemble_errors("!byte 1 / 0\n");
    assert!(errors.iter().any(|e| e.contains("Division by zero")));
}

// ---- debug info -----------------------------------------------------

#[test]
fn every_emitted_byte_has_a_debug_record() {
    let source = "* = $0801\n lda #$41\n sta $d020\n!byte 1, 2\n rts\n";
    let result = assemble(source);
    assert_eq!(result.error_count(), 0);
    assert_eq!(result.debug_info.bytes().len(), result.program.len() - 2);
}

#[test]
fn byte_roles_classify_instructions_and_data() {
    let source = "* = $0801\n lda #$41\n!byte 7\n";
    let result = assemble(source);
    let debug = &result.debug_info;
    assert!(debug.is_instruction(0x0801));
    assert!(!debug.is_instruction(0x0802));
    let data = debug.locations_at(0x0803);
    assert_eq!(data[0].role, ByteRole::Data);
}

#[test]
fn constants_are_recorded() {
    let result = assemble("* = $0801\nspeed = 7\n!byte speed\n");
    assert!(result
        .debug_info
        .constants()
        .iter()
        .any(|c| c.name == "speed" && c.value == "7"));
}

#[test]
fn debug_text_dump_is_line_oriented() {
    let result = assemble("* = $0801\nstart: rts\n");
    let text = result.debug_info.to_text(&result.sources);
    assert!(text.contains("[addresses]"));
    assert!(text.contains("0801 default main.asm:2 i"));
    assert!(text.contains("start 0801"));
}

// ---- round trip -----------------------------------------------------

#[test]
fn disassembly_round_trips_mnemonics_and_modes() {
    let source = "* = $0801\n lda #$41\n sta $d020\nzp = $fb\n ldx zp\nloop: dex\n bne loop\n jmp ($fffe)\n sta ($20),y\n rts\n";
    let result = assemble(source);
    assert_eq!(
        result.error_count(),
        0,
        "diagnostics: {:?}",
        result.formatted_diagnostics()
    );
    let image = &result.program[2..];
    let pred = result.debug_info.instruction_predicate(result.load_address);
    let lines = disassemble(image, result.load_address, Some(&pred), &DisasmOptions::default());
    let expect = [
        "lda #$41",
        "sta $d020",
        "ldx $fb",
        "dex",
        "bne",
        "jmp ($fffe)",
        "sta ($20),y",
        "rts",
    ];
    assert_eq!(lines.len(), expect.len());
    for (line, want) in lines.iter().zip(expect) {
        assert!(line.contains(want), "line {line:?} should contain {want:?}");
    }
}

#[test]
fn data_bytes_stay_data_in_round_trip() {
    // $60 in data must not decode as RTS when the predicate is used
    let source = "* = $0801\n!byte $60\n rts\n";
    let result = assemble(source);
    let image = &result.program[2..];
    let pred = result.debug_info.instruction_predicate(result.load_address);
    let lines = disassemble(image, result.load_address, Some(&pred), &DisasmOptions::default());
    assert!(lines[0].contains("!byte $60"));
    assert!(lines[1].contains("rts"));
}
