use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader: a hard-coded triangle placed by the per-image transform block.
    // NOTE: the block layout must match cubic_math::TransformBlock:
    //   - set 0, binding 0: three column-major mat4 (model, view, projection)
    let vs_src = r#"
#version 450
layout(set = 0, binding = 0) uniform Transform {
    mat4 model;
    mat4 view;
    mat4 projection;
} u;

layout(location = 0) out vec3 vColor;

const vec2 POS[3] = vec2[3](vec2(0.0, 0.6), vec2(-0.5, -0.4), vec2(0.5, -0.4));
const vec3 COL[3] = vec3[3](vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0), vec3(0.0, 0.0, 1.0));

void main() {
    vColor = COL[gl_VertexIndex];
    gl_Position = u.projection * u.view * u.model * vec4(POS[gl_VertexIndex], 0.0, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "transform.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "transform.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("transform.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("transform.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
