use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::foundation::debug_messenger::GfxDebugMsger;

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    ///
    /// 生命周期由 Gfx 手动控制
    pub(crate) ash_instance: ash::Instance,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: String,
        engine_name: String,
        extra_instance_exts: Vec<&'static CStr>,
    ) -> Self {
        let app_name = CString::new(app_name.as_str()).unwrap();
        let engine_name = CString::new(engine_name.as_str()).unwrap();
        let app_info = vk::ApplicationInfo::default()
            // 版本过低时，有些函数无法正确加载
            .api_version(vk::API_VERSION_1_3)
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, &extra_instance_exts);
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = Self::get_layers(vk_entry);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，覆盖 instance 创建期间的消息
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None).unwrap() };

        Self { ash_instance: handle }
    }

    pub fn destroy(self) {
        log::info!("Destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getter
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[&'static CStr]) -> Vec<*const c_char> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None).unwrap() };
        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();

        let mut enable_ext = |ext: &'static CStr| {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| ext == unsafe { CStr::from_ptr(supported_ext.extension_name.as_ptr()) });
            if supported {
                enabled_extensions.insert(ext);
            } else {
                panic!("Required instance extension ({ext:?}) is missing");
            }
        };

        enable_ext(ash::khr::surface::NAME);
        enable_ext(ash::ext::debug_utils::NAME);
        for ext in extra_instance_exts {
            enable_ext(ext);
        }

        enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec()
    }

    /// instance 所需的，且受支持的 layer
    fn get_layers(vk_entry: &ash::Entry) -> Vec<*const c_char> {
        let all_layer_props = unsafe { vk_entry.enumerate_instance_layer_properties().unwrap() };

        const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
        let validation_supported = all_layer_props
            .iter()
            .any(|layer| VALIDATION_LAYER == unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) });

        if cfg!(debug_assertions) && validation_supported {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        }
    }
}
